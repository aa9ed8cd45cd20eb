// crates/gem-server/src/worker/mod.rs
// Worker process: claim → execute → seal, forever

mod execute;
mod idempotency;
pub mod sweeper;

pub use execute::Executor;
pub use idempotency::{IdempotencyVerdict, check as idempotency_check};
pub use sweeper::Sweeper;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::ProviderSecrets;
use crate::db::{self, DatabasePool};
use crate::handlers::HandlerRegistry;
use crate::registry::Registry;

/// Build a fleet-unique worker identity.
///
/// Stamped onto every claimed row so operators can see who held what.
pub fn make_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}:{}:{}", std::process::id(), &short[..8])
}

/// The claim loop. One worker processes invocations serially; parallelism
/// comes from running more workers, and correctness from the atomic claim
/// plus the unique receipt constraint - never from shared memory.
pub struct Worker {
    executor: Executor,
    pool: Arc<DatabasePool>,
    worker_id: String,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        pool: Arc<DatabasePool>,
        registry: Arc<Registry>,
        handlers: Arc<HandlerRegistry>,
        secrets: ProviderSecrets,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let executor = Executor::new(pool.clone(), registry, handlers, secrets);
        Self {
            executor,
            pool,
            worker_id: make_worker_id(),
            poll_interval,
            shutdown,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until shutdown. A claimed row is followed immediately by another
    /// claim attempt so a backlog drains at full speed; only an empty queue
    /// sleeps.
    pub async fn run(mut self) {
        tracing::info!(worker_id = %self.worker_id, "worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    // Store trouble: the invocation stays wherever its last
                    // transition left it and the sweeper picks up the pieces.
                    tracing::warn!(worker_id = %self.worker_id, "worker cycle error: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        tracing::info!(worker_id = %self.worker_id, "worker shutting down");
    }

    /// Claim and execute at most one invocation. Returns true when a row was
    /// processed.
    pub async fn poll_once(&self) -> anyhow::Result<bool> {
        let worker_id = self.worker_id.clone();
        let claimed = self
            .pool
            .interact_with_retry(move |conn| Ok(db::claim_next_sync(conn, &worker_id)?))
            .await?;

        let Some(invocation) = claimed else {
            return Ok(false);
        };

        tracing::debug!(
            worker_id = %self.worker_id,
            call_id = %invocation.call_id,
            tool = %invocation.tool_name,
            "claimed invocation"
        );

        // A handler panic or error must never poison the loop; execute()
        // already converts everything but store failures into receipts.
        self.executor.execute(&invocation).await?;
        Ok(true)
    }
}

/// Spawn the worker loop; returns the shutdown sender.
pub fn spawn(
    pool: Arc<DatabasePool>,
    registry: Arc<Registry>,
    handlers: Arc<HandlerRegistry>,
    secrets: ProviderSecrets,
    poll_interval: Duration,
) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = Worker::new(pool, registry, handlers, secrets, poll_interval, shutdown_rx);
    tokio::spawn(async move {
        worker.run().await;
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ids_are_unique() {
        let a = make_worker_id();
        let b = make_worker_id();
        assert_ne!(a, b);
        assert!(a.contains(':'));
    }
}
