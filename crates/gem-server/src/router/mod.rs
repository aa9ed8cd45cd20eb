// crates/gem-server/src/router/mod.rs
// The Brain: typed request in, validated queued invocations out

pub mod planner;

pub use planner::Planner;

use gem_types::{
    BrainMode, BrainRequest, BrainResponse, Effects, PlannedCall, ReceiptStatus, ReceiptView,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{self, DatabasePool, ReceiptRow};
use crate::registry::Registry;
use crate::validator;

/// Default receipt-wait bound for `enqueue_and_wait`.
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;
/// Default receipt poll interval.
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// The Router front-end. Owns plan construction and queue writes; receipts
/// and domain tables belong to the Worker and its handlers.
pub struct Brain {
    pool: Arc<DatabasePool>,
    registry: Arc<Registry>,
    planner: Planner,
}

impl Brain {
    pub fn new(pool: Arc<DatabasePool>, registry: Arc<Registry>) -> Self {
        Self {
            pool,
            registry,
            planner: Planner::new(),
        }
    }

    /// Execute one Router run according to the request mode.
    pub async fn run(&self, request: BrainRequest) -> BrainResponse {
        let run_id = format!("run-{}", Uuid::new_v4());
        let limits = request.limits.clone().unwrap_or_default();

        let (mut planned, mut decision) =
            self.planner
                .plan(&request.message, request.context.as_ref(), &self.registry);

        // Cap plan length; excess candidates are silently truncated
        if let Some(max) = limits.max_tool_calls
            && planned.len() > max
        {
            planned.truncate(max);
        }

        let mut response = BrainResponse {
            ok: true,
            run_id: run_id.clone(),
            decision: String::new(),
            planned: planned.clone(),
            enqueued: Vec::new(),
            receipts: Vec::new(),
            pending: Vec::new(),
            errors: Vec::new(),
        };

        // Atomic-plan rule: one invalid candidate aborts the run before any
        // enqueue. The planner pre-validates its own extractions, so this
        // guards hand-built or truncated plans.
        for call in &planned {
            let Some(tool) = self.registry.get(&call.tool_name) else {
                response.ok = false;
                response
                    .errors
                    .push(format!("planned tool {:?} is not registered", call.tool_name));
                continue;
            };
            if let Err(ve) = validator::validate(&tool.input_schema, &call.input) {
                response.ok = false;
                response
                    .errors
                    .push(format!("{}: {}", call.tool_name, ve));
            }
        }
        if !response.ok {
            response.decision = format!("{decision}; plan rejected by validation");
            self.audit(&request, &response).await;
            return response;
        }

        match request.mode {
            BrainMode::Answer => {
                decision = format!("{decision}; {}", summarise(&planned));
            }
            BrainMode::Plan => {
                decision = format!("{decision}; {} (awaiting approval)", summarise(&planned));
            }
            BrainMode::Enqueue | BrainMode::EnqueueAndWait => {
                self.enqueue_plan(&planned, &mut response).await;
                decision = format!(
                    "{decision}; enqueued {}/{} calls",
                    response.enqueued.len(),
                    planned.len()
                );

                if request.mode == BrainMode::EnqueueAndWait && !response.enqueued.is_empty() {
                    let wait = Duration::from_millis(
                        limits.wait_timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS),
                    );
                    let poll = Duration::from_millis(
                        limits.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
                    );
                    self.wait_for_receipts(wait, poll, &mut response).await;
                    if !response.pending.is_empty() {
                        decision = format!(
                            "{decision}; {} receipts observed, {} still pending at wait timeout",
                            response.receipts.len(),
                            response.pending.len()
                        );
                    }
                }
            }
        }

        response.ok = response.errors.is_empty();
        response.decision = decision;
        self.audit(&request, &response).await;
        response
    }

    /// Best-effort enqueue: a store error on one call is reported and does
    /// not roll back the calls already written.
    async fn enqueue_plan(&self, planned: &[PlannedCall], response: &mut BrainResponse) {
        for call in planned {
            let call_id = format!("call-{}", Uuid::new_v4());
            let input_json = match serde_json::to_string(&call.input) {
                Ok(json) => json,
                Err(e) => {
                    response
                        .errors
                        .push(format!("{}: input did not serialize: {e}", call.tool_name));
                    continue;
                }
            };

            let insert = {
                let call_id = call_id.clone();
                let tool_name = call.tool_name.clone();
                let idempotency_key = call.idempotency_key.clone();
                self.pool
                    .interact(move |conn| {
                        db::enqueue_sync(
                            conn,
                            &call_id,
                            &tool_name,
                            &input_json,
                            idempotency_key.as_deref(),
                        )
                        .map_err(Into::into)
                    })
                    .await
            };

            match insert {
                Ok(()) => response.enqueued.push(call_id),
                Err(e) => {
                    tracing::warn!(tool = %call.tool_name, "enqueue failed: {}", e);
                    response
                        .errors
                        .push(format!("{}: enqueue failed: {e}", call.tool_name));
                }
            }
        }
    }

    /// Poll the receipt table until every enqueued call is sealed or the
    /// wait bound fires. The invocations stay in flight either way; only the
    /// caller stops waiting.
    async fn wait_for_receipts(
        &self,
        wait_timeout: Duration,
        poll_interval: Duration,
        response: &mut BrainResponse,
    ) {
        let deadline = tokio::time::Instant::now() + wait_timeout;

        loop {
            let call_ids = response.enqueued.clone();
            let rows = self
                .pool
                .try_interact("receipt poll", move |conn| {
                    Ok(db::get_receipts_for_calls_sync(conn, &call_ids)?)
                })
                .await
                .unwrap_or_default();

            if rows.len() == response.enqueued.len() {
                response.receipts = rows.iter().map(receipt_view).collect();
                response.pending.clear();
                return;
            }

            if tokio::time::Instant::now() >= deadline {
                let sealed: Vec<String> = rows.iter().map(|r| r.call_id.clone()).collect();
                response.pending = response
                    .enqueued
                    .iter()
                    .filter(|id| !sealed.contains(id))
                    .cloned()
                    .collect();
                response.receipts = rows.iter().map(receipt_view).collect();
                return;
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Write the run audit row. Best-effort: losing an audit record must not
    /// fail the run.
    async fn audit(&self, request: &BrainRequest, response: &BrainResponse) {
        let run = db::RouterRun {
            run_id: response.run_id.clone(),
            message: request.message.clone(),
            mode: mode_label(request.mode).to_string(),
            decision: Some(response.decision.clone()),
            planned: serde_json::to_string(&response.planned).unwrap_or_else(|_| "[]".into()),
            enqueued: serde_json::to_string(&response.enqueued).unwrap_or_else(|_| "[]".into()),
            receipts: serde_json::to_string(&response.receipts).unwrap_or_else(|_| "[]".into()),
            status: if response.ok { "ok" } else { "error" }.to_string(),
            errors: serde_json::to_string(&response.errors).unwrap_or_else(|_| "[]".into()),
            created_at: String::new(),
        };
        self.pool
            .try_interact("router run audit", move |conn| {
                db::insert_run_sync(conn, &run).map_err(Into::into)
            })
            .await;
    }
}

fn mode_label(mode: BrainMode) -> &'static str {
    match mode {
        BrainMode::Answer => "answer",
        BrainMode::Plan => "plan",
        BrainMode::Enqueue => "enqueue",
        BrainMode::EnqueueAndWait => "enqueue_and_wait",
    }
}

fn summarise(planned: &[PlannedCall]) -> String {
    if planned.is_empty() {
        return "would run nothing".to_string();
    }
    let names: Vec<&str> = planned.iter().map(|c| c.tool_name.as_str()).collect();
    format!("would run {}", names.join(", "))
}

/// Convert a stored receipt row into its wire shape.
pub fn receipt_view(row: &ReceiptRow) -> ReceiptView {
    let status = match row.status.as_str() {
        "succeeded" => ReceiptStatus::Succeeded,
        "not_configured" => ReceiptStatus::NotConfigured,
        "failed" => ReceiptStatus::Failed,
        other => {
            tracing::warn!(call_id = %row.call_id, status = other, "unknown receipt status");
            ReceiptStatus::Failed
        }
    };
    ReceiptView {
        call_id: row.call_id.clone(),
        tool_name: row.tool_name.clone(),
        status,
        result: serde_json::from_str(&row.result).unwrap_or(serde_json::Value::Null),
        effects: serde_json::from_str::<Effects>(&row.effects).unwrap_or_default(),
        created_at: row.created_at.clone(),
    }
}
