//! Shutdown signalling and fixed-interval background tasks.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Fires the shutdown signal. Dropping it counts as firing.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Cloneable listener half; every worker and background task holds one.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested (or the trigger is gone).
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A named background task that calls `tick` every `period` until shut down.
///
/// Each task is its own tokio task: a panic inside one tick ends that task
/// only and is reported when it is joined.
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &'static str, period: Duration, shutdown: ShutdownSignal, tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let mut tick = tick;
        Self::spawn_async(name, period, shutdown, move || {
            tick();
            std::future::ready(())
        })
    }

    pub fn spawn_async<F, Fut>(
        name: &'static str,
        period: Duration,
        mut shutdown: ShutdownSignal,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so work starts one period in.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.triggered() => break,
                    _ = interval.tick() => tick().await,
                }
            }
            debug!(task = name, "Periodic task stopped");
        });

        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the task to exit. The caller must have fired its shutdown signal.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "Periodic task ended abnormally");
        }
    }
}
