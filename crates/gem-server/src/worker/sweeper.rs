// worker/sweeper.rs
// Reclaim sweeper: resolves rows stuck in `running` after a worker dies
//
// Receipt-first discipline: a stale row gets its `worker_lost` receipt
// written BEFORE the terminal transition. If the original worker is in fact
// still alive and seals first, the sweeper loses the receipt insert and
// merely finishes the row to match - exactly one receipt either way.

use gem_types::error_codes;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::db::{self, DatabasePool, InvocationStatus};
use crate::registry::Registry;

/// Floor for rows whose tool has vanished from the registry.
const FALLBACK_STALENESS_MS: u64 = 60_000;

pub struct Sweeper {
    pool: Arc<DatabasePool>,
    registry: Arc<Registry>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Sweeper {
    pub fn new(
        pool: Arc<DatabasePool>,
        registry: Arc<Registry>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            registry,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("reclaim sweeper started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(reclaimed) => {
                    tracing::info!(reclaimed, "sweeper reclaimed stale invocations");
                }
                Err(e) => {
                    tracing::warn!("sweeper cycle error: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        tracing::info!("reclaim sweeper shutting down");
    }

    /// Scan `running` rows and reclaim those past their staleness bound
    /// (2 × the tool's timeout). Returns how many rows were resolved.
    pub async fn sweep_once(&self) -> anyhow::Result<usize> {
        let candidates = self
            .pool
            .interact(|conn| Ok(db::stale_candidates_sync(conn)?))
            .await?;

        let mut reclaimed = 0;
        for candidate in candidates {
            let bound_ms = self
                .registry
                .get(&candidate.tool_name)
                .map(|tool| tool.timeout_ms.saturating_mul(2))
                .unwrap_or(FALLBACK_STALENESS_MS);
            let age_ms = (candidate.age_seconds.max(0) as u64).saturating_mul(1000);
            if age_ms <= bound_ms {
                continue;
            }

            tracing::warn!(
                call_id = %candidate.call_id,
                tool = %candidate.tool_name,
                worker = candidate.worker_id.as_deref().unwrap_or("?"),
                age_seconds = candidate.age_seconds,
                "reclaiming stale running invocation"
            );

            let call_id = candidate.call_id.clone();
            let tool_name = candidate.tool_name.clone();
            let worker = candidate.worker_id.clone().unwrap_or_default();
            self.pool
                .interact_with_retry(move |conn| {
                    let result = json!({
                        "error": {
                            "error_code": error_codes::WORKER_LOST,
                            "message": format!(
                                "worker {worker:?} never sealed this call; reclaimed by the sweeper"
                            ),
                        }
                    });
                    let inserted = db::insert_receipt_if_absent_sync(
                        conn,
                        &call_id,
                        &tool_name,
                        "failed",
                        &result.to_string(),
                        "{}",
                    )?;
                    if inserted {
                        db::finish_sync(
                            conn,
                            &call_id,
                            InvocationStatus::Failed,
                            Some(error_codes::WORKER_LOST),
                        )?;
                    } else {
                        // The worker beat us to the receipt; finish the row
                        // to whatever that receipt says.
                        let status = match db::get_receipt_sync(conn, &call_id)? {
                            Some(receipt) if receipt.status == "succeeded" => {
                                InvocationStatus::Succeeded
                            }
                            _ => InvocationStatus::Failed,
                        };
                        db::finish_sync(conn, &call_id, status, None)?;
                    }
                    Ok(())
                })
                .await?;
            reclaimed += 1;
        }

        Ok(reclaimed)
    }
}

/// Spawn the sweeper loop; returns the shutdown sender.
pub fn spawn(
    pool: Arc<DatabasePool>,
    registry: Arc<Registry>,
    interval: Duration,
) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = Sweeper::new(pool, registry, interval, shutdown_rx);
    tokio::spawn(async move {
        sweeper.run().await;
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sweeper(pool: Arc<DatabasePool>) -> Sweeper {
        let (_tx, rx) = watch::channel(false);
        Sweeper::new(
            pool,
            Arc::new(Registry::load().unwrap()),
            Duration::from_secs(30),
            rx,
        )
    }

    #[tokio::test]
    async fn test_fresh_running_rows_are_left_alone() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        pool.interact(|conn| {
            db::enqueue_sync(conn, "c1", "os.health_check", "{}", None)?;
            db::claim_next_sync(conn, "w1")?;
            Ok(())
        })
        .await
        .unwrap();

        let sweeper = test_sweeper(pool.clone());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        let receipt = pool
            .interact(|conn| Ok(db::get_receipt_sync(conn, "c1")?))
            .await
            .unwrap();
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn test_stale_row_gets_worker_lost_receipt() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        pool.interact(|conn| {
            db::enqueue_sync(conn, "c1", "os.health_check", "{}", None)?;
            db::claim_next_sync(conn, "w1")?;
            // Backdate the claim far past 2 × timeout_ms
            conn.execute(
                "UPDATE invocations SET claimed_at = datetime('now', '-1 hour') WHERE call_id = 'c1'",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let sweeper = test_sweeper(pool.clone());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        let (receipt, row) = pool
            .interact(|conn| {
                Ok((
                    db::get_receipt_sync(conn, "c1")?,
                    db::get_invocation_sync(conn, "c1")?,
                ))
            })
            .await
            .unwrap();
        let receipt = receipt.unwrap();
        assert_eq!(receipt.status, "failed");
        assert!(receipt.result.contains("worker_lost"));
        assert_eq!(row.unwrap().status, InvocationStatus::Failed);

        // Second sweep finds nothing: the row is terminal now
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_defers_to_existing_receipt() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        pool.interact(|conn| {
            db::enqueue_sync(conn, "c1", "os.health_check", "{}", None)?;
            db::claim_next_sync(conn, "w1")?;
            conn.execute(
                "UPDATE invocations SET claimed_at = datetime('now', '-1 hour') WHERE call_id = 'c1'",
                [],
            )?;
            // The worker sealed the receipt but died before the transition
            db::insert_receipt_sync(conn, "c1", "os.health_check", "succeeded", "{}", "{}")?;
            Ok(())
        })
        .await
        .unwrap();

        let sweeper = test_sweeper(pool.clone());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        let (receipt, row) = pool
            .interact(|conn| {
                Ok((
                    db::get_receipt_sync(conn, "c1")?,
                    db::get_invocation_sync(conn, "c1")?,
                ))
            })
            .await
            .unwrap();
        // Still exactly one receipt, and it is the worker's, not worker_lost
        assert_eq!(receipt.unwrap().status, "succeeded");
        assert_eq!(row.unwrap().status, InvocationStatus::Succeeded);
    }
}
