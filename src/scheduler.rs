//! Fixed-interval drain scheduling.
//!
//! [`FlushScheduler`] owns the timer task of one engine. Each tick spawns a
//! drain cycle as its own task, so the cadence does not stretch when a cycle
//! is slow. Cycles never overlap: every drain (timer, [`flush_now`] or the
//! final drain of [`stop`]) first takes the drain gate, and a tick that
//! finds the gate taken is dropped rather than queued.
//!
//! ```text
//!   t=0        T          2T         3T         4T
//!   │          │          │          │          │
//!   │          ├─ cycle ──────────┤  │          │
//!   │          │          ✗ skip  │  ├─ cycle ┤ ├─ cycle ┤
//! ```
//!
//! Stopping prevents future ticks only; an in-flight cycle always runs to
//! completion.
//!
//! For deterministic tests the scheduler can be driven by a trigger channel
//! instead of the clock (see [`FlushScheduler::with_trigger`]), or run on
//! tokio's paused clock.
//!
//! [`flush_now`]: FlushScheduler::flush_now
//! [`stop`]: FlushScheduler::stop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::drain::{DrainEngine, DrainReport};
use crate::error::Result;
use crate::metrics::FlushMetrics;

/// Source of drain ticks.
enum Ticks {
    Clock(Interval),
    Trigger(mpsc::Receiver<()>),
    /// A period beyond the clock's range: never ticks.
    Never,
}

impl Ticks {
    fn every(period: Duration) -> Self {
        // First tick one full period after start.
        let Some(start) = Instant::now().checked_add(period) else {
            warn!(?period, "flush interval overflows the clock, timer disabled");
            return Ticks::Never;
        };
        let mut interval = time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Ticks::Clock(interval)
    }

    /// Waits for the next tick. `None` means the source is exhausted.
    async fn next(&mut self) -> Option<()> {
        match self {
            Ticks::Clock(interval) => {
                interval.tick().await;
                Some(())
            }
            Ticks::Trigger(rx) => rx.recv().await,
            Ticks::Never => std::future::pending().await,
        }
    }
}

/// Owned, stoppable timer running drain cycles of one [`DrainEngine`].
pub struct FlushScheduler {
    engine: Arc<DrainEngine>,
    gate: Arc<Mutex<()>>,
    metrics: Arc<FlushMetrics>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Starts ticking every `period`, first tick at `now + period`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(engine: Arc<DrainEngine>, metrics: Arc<FlushMetrics>, period: Duration) -> Self {
        info!(namespace = engine.namespace(), ?period, "starting flush scheduler");
        Self::spawn(engine, metrics, Ticks::every(period))
    }

    /// Starts a scheduler that drains once per message on `trigger`.
    ///
    /// The scheduler stops ticking when every sender is dropped.
    pub fn with_trigger(
        engine: Arc<DrainEngine>,
        metrics: Arc<FlushMetrics>,
        trigger: mpsc::Receiver<()>,
    ) -> Self {
        debug!(namespace = engine.namespace(), "starting triggered flush scheduler");
        Self::spawn(engine, metrics, Ticks::Trigger(trigger))
    }

    fn spawn(engine: Arc<DrainEngine>, metrics: Arc<FlushMetrics>, ticks: Ticks) -> Self {
        let gate = Arc::new(Mutex::new(()));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(
            Arc::clone(&engine),
            Arc::clone(&gate),
            Arc::clone(&metrics),
            ticks,
            shutdown_rx,
        ));

        Self {
            engine,
            gate,
            metrics,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Returns whether the timer task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Runs a drain now, waiting for any in-flight cycle to finish first.
    pub async fn flush_now(&self) -> Result<DrainReport> {
        let _guard = self.gate.lock().await;
        self.engine.drain_all().await
    }

    /// Cancels future ticks.
    ///
    /// With `final_drain`, waits for an in-flight cycle and then runs one
    /// last drain, returning its report.
    pub async fn stop(mut self, final_drain: bool) -> Result<Option<DrainReport>> {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "flush scheduler task failed");
            }
        }
        info!(namespace = self.engine.namespace(), final_drain, "flush scheduler stopped");

        if !final_drain {
            return Ok(None);
        }
        let _guard = self.gate.lock().await;
        let report = self.engine.drain_all().await?;
        Ok(Some(report))
    }

    /// Returns the metrics this scheduler reports into.
    pub fn metrics(&self) -> &FlushMetrics {
        &self.metrics
    }

    fn cancel(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already be gone if its trigger closed.
            let _ = shutdown.send(());
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run(
    engine: Arc<DrainEngine>,
    gate: Arc<Mutex<()>>,
    metrics: Arc<FlushMetrics>,
    mut ticks: Ticks,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            tick = ticks.next() => {
                if tick.is_none() {
                    break;
                }
            }
        }

        let guard = match Arc::clone(&gate).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                metrics.ticks_skipped.add(1);
                debug!(namespace = engine.namespace(), "drain still in flight, skipping tick");
                continue;
            }
        };

        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = engine.drain_all().await {
                warn!(namespace = engine.namespace(), error = %e, "drain cycle failed");
            }
        });
    }
}
