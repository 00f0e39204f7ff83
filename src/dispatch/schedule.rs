//! Periodic tasks with an explicit stop signal

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

/// A job run on a fixed interval until stopped. A run in progress is never
/// interrupted; the stop takes effect between runs.
pub struct ScheduledTask {
    name: &'static str,
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F, Fut>(name: &'static str, initial_delay: Duration, every: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = stop_rx.recv() => {
                    debug!(task = name, "Stopped before first run");
                    return;
                }
            }

            let mut tick = interval(every);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        job().await;
                    }
                    _ = stop_rx.recv() => {
                        info!(task = name, "Scheduled task shutting down");
                        break;
                    }
                }
            }
        });

        debug!(task = name, ?initial_delay, ?every, "Scheduled task started");
        Self {
            name,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task and wait for it to finish its current run.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.handle.await;
    }
}
