// handlers/invoices.rs
// Invoice tools

use gem_types::Effects;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{HandlerContext, HandlerOutcome, HandlerRegistry, req_i64, req_str};
use crate::db;
use crate::error::{GemError, Result};

pub fn register(registry: &mut HandlerRegistry) {
    registry.insert("invoices.create", |input, ctx| Box::pin(create(input, ctx)));
    registry.insert("invoices.mark_paid", |input, ctx| {
        Box::pin(mark_paid(input, ctx))
    });
}

/// Issue the invoice for a job. UNIQUE(job_id) is the arbiter when two
/// workers race past the existence check with the same key.
async fn create(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let job_id = req_str(&input, "job_id")?.to_string();
    let amount_cents = req_i64(&input, "amount_cents")?;

    let invoice_id = format!("inv-{}", Uuid::new_v4());

    let (invoice_id, reused) = {
        let job_id = job_id.clone();
        ctx.pool
            .interact_with_retry(move |conn| {
                if let Some(existing) = db::get_invoice_id_by_job_sync(conn, &job_id)? {
                    return Ok((existing, true));
                }
                if !db::job_exists_sync(conn, &job_id)? {
                    return Err(GemError::Handler(format!("job {job_id} not found")).into());
                }
                match db::insert_invoice_sync(conn, &invoice_id, &job_id, amount_cents) {
                    Ok(()) => Ok((invoice_id, false)),
                    Err(e) if db::is_unique_violation(&e) => {
                        let existing = db::get_invoice_id_by_job_sync(conn, &job_id)?
                            .ok_or_else(|| anyhow::anyhow!("invoice vanished after constraint hit"))?;
                        Ok((existing, true))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?
    };

    let effects = Effects::db_write("invoices", if reused { "reuse" } else { "insert" }, &invoice_id);
    let result = json!({
        "invoice_id": invoice_id,
        "job_id": job_id,
        "amount_cents": amount_cents,
        "reused": reused,
    });
    Ok(HandlerOutcome::success(result, effects))
}

async fn mark_paid(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let invoice_id = req_str(&input, "invoice_id")?.to_string();

    {
        let invoice_id = invoice_id.clone();
        ctx.pool
            .interact(move |conn| {
                let updated = db::mark_invoice_paid_sync(conn, &invoice_id)?;
                if updated == 1 {
                    return Ok(());
                }
                match db::get_invoice_status_sync(conn, &invoice_id)? {
                    Some(status) if status == "paid" => Ok(()),
                    Some(status) => Err(GemError::Handler(format!(
                        "invoice {invoice_id} is {status}, cannot mark paid"
                    ))
                    .into()),
                    None => {
                        Err(GemError::Handler(format!("invoice {invoice_id} not found")).into())
                    }
                }
            })
            .await?;
    }

    let effects = Effects::db_write("invoices", "update", &invoice_id);
    let result = json!({"invoice_id": invoice_id, "status": "paid"});
    Ok(HandlerOutcome::success(result, effects))
}
