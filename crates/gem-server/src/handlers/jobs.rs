// handlers/jobs.rs
// Job scheduling tools

use gem_types::Effects;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{HandlerContext, HandlerOutcome, HandlerRegistry, opt_str, req_str};
use crate::db;
use crate::error::{GemError, Result};

pub fn register(registry: &mut HandlerRegistry) {
    registry.insert("jobs.schedule", |input, ctx| Box::pin(schedule(input, ctx)));
    registry.insert("jobs.complete", |input, ctx| Box::pin(complete(input, ctx)));
}

async fn schedule(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let quote_id = req_str(&input, "quote_id")?.to_string();
    let scheduled_for = opt_str(&input, "scheduled_for").map(str::to_string);

    let job_id = format!("job-{}", Uuid::new_v4());

    {
        let quote_id = quote_id.clone();
        let job_id = job_id.clone();
        ctx.pool
            .interact(move |conn| {
                if !db::quote_exists_sync(conn, &quote_id)? {
                    return Err(GemError::Handler(format!("quote {quote_id} not found")).into());
                }
                db::insert_job_sync(conn, &job_id, &quote_id, scheduled_for.as_deref())?;
                Ok(())
            })
            .await?;
    }

    let effects = Effects::db_write("jobs", "insert", &job_id);
    let result = json!({"job_id": job_id, "quote_id": quote_id});
    Ok(HandlerOutcome::success(result, effects))
}

async fn complete(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let job_id = req_str(&input, "job_id")?.to_string();

    {
        let job_id = job_id.clone();
        ctx.pool
            .interact(move |conn| {
                let updated = db::complete_job_sync(conn, &job_id)?;
                if updated == 1 {
                    return Ok(());
                }
                match db::get_job_status_sync(conn, &job_id)? {
                    Some(status) if status == "completed" => Ok(()),
                    Some(status) => Err(GemError::Handler(format!(
                        "job {job_id} is {status}, cannot complete"
                    ))
                    .into()),
                    None => Err(GemError::Handler(format!("job {job_id} not found")).into()),
                }
            })
            .await?;
    }

    let effects = Effects::db_write("jobs", "update", &job_id);
    let result = json!({"job_id": job_id, "status": "completed"});
    Ok(HandlerOutcome::success(result, effects))
}
