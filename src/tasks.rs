//! The task scheduler: owns the lifecycle of the three background loops.
//!
//! Each worker gets its own shutdown signal, registered under a
//! [`WorkerId`]. The loops share no locks; they stay out of each other's
//! way purely through the disjoint selection predicates in the store
//! layer. `stop()` is fire-and-forget; `stop_and_wait()` additionally
//! joins every worker so in-flight work finishes before it returns.

use crate::config::AppConfig;
use crate::embed::EmbeddingGenerator;
use crate::process::Dispatcher;
use crate::scan::Scanner;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Identifies one background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerId {
    Scanner,
    Dispatcher,
    Embedder,
}

impl WorkerId {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerId::Scanner => "scanner",
            WorkerId::Dispatcher => "dispatcher",
            WorkerId::Embedder => "embedder",
        }
    }
}

struct Worker {
    id: WorkerId,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Start/stop handle over the scanner, dispatcher, and embedder loops.
pub struct TaskScheduler {
    workers: Vec<Worker>,
}

impl TaskScheduler {
    /// Launch all three workers, each with a fresh shutdown signal.
    pub fn start(
        scanner: Scanner,
        dispatcher: Dispatcher,
        embedder: EmbeddingGenerator,
        config: &AppConfig,
    ) -> Self {
        let mut workers = Vec::new();

        {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let interval = Duration::from_secs_f64(config.scanner.pass_interval_secs);
            let handle = tokio::spawn(scanner_loop(scanner, shutdown_rx, interval));
            workers.push(Worker {
                id: WorkerId::Scanner,
                shutdown_tx,
                handle,
            });
        }

        {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let idle = Duration::from_secs_f64(config.dispatcher.idle_backoff_secs);
            let handle = tokio::spawn(dispatcher_loop(dispatcher, shutdown_rx, idle));
            workers.push(Worker {
                id: WorkerId::Dispatcher,
                shutdown_tx,
                handle,
            });
        }

        {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let idle = Duration::from_secs_f64(config.embedder.idle_backoff_secs);
            let pause = Duration::from_secs_f64(config.embedder.pause_secs);
            let handle = tokio::spawn(embedder_loop(embedder, shutdown_rx, idle, pause));
            workers.push(Worker {
                id: WorkerId::Embedder,
                shutdown_tx,
                handle,
            });
        }

        tracing::debug!("background workers started");
        Self { workers }
    }

    /// Request cancellation of every worker without waiting for any of
    /// them to observe it.
    pub fn stop(&self) {
        for worker in &self.workers {
            if worker.shutdown_tx.send(true).is_err() {
                tracing::debug!(worker = worker.id.as_str(), "worker already gone");
            }
        }
        tracing::info!("background workers are stopping");
    }

    /// Request cancellation and join every worker. Returns once all loops
    /// have observed their signal and exited.
    pub async fn stop_and_wait(self) {
        self.stop();
        for worker in self.workers {
            if let Err(error) = worker.handle.await {
                tracing::warn!(worker = worker.id.as_str(), %error, "worker join failed");
            } else {
                tracing::debug!(worker = worker.id.as_str(), "worker stopped");
            }
        }
    }
}

/// Sleep for `duration` or until the shutdown signal flips.
async fn idle_sleep(duration: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
}

async fn scanner_loop(scanner: Scanner, mut shutdown: watch::Receiver<bool>, interval: Duration) {
    while !*shutdown.borrow() {
        tracing::info!("scanning for objects to save");
        match scanner.run_pass(&shutdown).await {
            Ok(summary) => {
                tracing::info!(
                    saved = summary.saved,
                    duplicates = summary.duplicates,
                    ignored = summary.ignored,
                    elapsed_secs = format!("{:.2}", summary.elapsed_secs),
                    "scan pass complete"
                );
            }
            Err(error) => {
                tracing::error!(%error, "scan pass failed");
                scanner.record_pass_failure(&error).await;
            }
        }

        if *shutdown.borrow() {
            break;
        }
        idle_sleep(interval, &mut shutdown).await;
    }
}

async fn dispatcher_loop(
    dispatcher: Dispatcher,
    mut shutdown: watch::Receiver<bool>,
    idle_backoff: Duration,
) {
    while !*shutdown.borrow() {
        match dispatcher.run_once().await {
            Ok(true) => {}
            Ok(false) => idle_sleep(idle_backoff, &mut shutdown).await,
            Err(error) => {
                tracing::error!(%error, "dispatch iteration failed");
                idle_sleep(idle_backoff, &mut shutdown).await;
            }
        }
    }
}

async fn embedder_loop(
    embedder: EmbeddingGenerator,
    mut shutdown: watch::Receiver<bool>,
    idle_backoff: Duration,
    pause: Duration,
) {
    while !*shutdown.borrow() {
        match embedder.run_once().await {
            Ok(true) => idle_sleep(pause, &mut shutdown).await,
            Ok(false) => idle_sleep(idle_backoff, &mut shutdown).await,
            Err(error) => {
                tracing::error!(%error, "embedding iteration failed");
                idle_sleep(idle_backoff, &mut shutdown).await;
            }
        }
    }
}
