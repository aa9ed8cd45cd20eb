// handlers/inspections.rs
// Roof inspection tools

use gem_types::Effects;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{HandlerContext, HandlerOutcome, HandlerRegistry, req_str};
use crate::db;
use crate::error::{GemError, Result};

pub fn register(registry: &mut HandlerRegistry) {
    registry.insert("inspections.book", |input, ctx| Box::pin(book(input, ctx)));
    registry.insert("inspections.complete", |input, ctx| {
        Box::pin(complete(input, ctx))
    });
}

async fn book(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let lead_id = req_str(&input, "lead_id")?.to_string();
    let scheduled_for = req_str(&input, "scheduled_for")?.to_string();

    let inspection_id = format!("insp-{}", Uuid::new_v4());

    {
        let lead_id = lead_id.clone();
        let scheduled_for = scheduled_for.clone();
        let inspection_id = inspection_id.clone();
        ctx.pool
            .interact(move |conn| {
                if db::get_lead_sync(conn, &lead_id)?.is_none() {
                    return Err(GemError::Handler(format!("lead {lead_id} not found")).into());
                }
                db::insert_inspection_sync(conn, &inspection_id, &lead_id, &scheduled_for)?;
                Ok(())
            })
            .await?;
    }

    let effects = Effects::db_write("inspections", "insert", &inspection_id);
    let result = json!({
        "inspection_id": inspection_id,
        "lead_id": lead_id,
        "scheduled_for": scheduled_for,
    });
    Ok(HandlerOutcome::success(result, effects))
}

async fn complete(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let inspection_id = req_str(&input, "inspection_id")?.to_string();
    let findings = req_str(&input, "findings")?.to_string();

    let status = {
        let inspection_id = inspection_id.clone();
        ctx.pool
            .interact(move |conn| {
                let updated = db::complete_inspection_sync(conn, &inspection_id, &findings)?;
                if updated == 1 {
                    return Ok("completed".to_string());
                }
                // Already completed counts as done; missing does not
                match db::get_inspection_status_sync(conn, &inspection_id)? {
                    Some(status) if status == "completed" => Ok(status),
                    Some(status) => Err(GemError::Handler(format!(
                        "inspection {inspection_id} is {status}, cannot complete"
                    ))
                    .into()),
                    None => {
                        Err(GemError::Handler(format!("inspection {inspection_id} not found"))
                            .into())
                    }
                }
            })
            .await?
    };

    let effects = Effects::db_write("inspections", "update", &inspection_id);
    let result = json!({"inspection_id": inspection_id, "status": status});
    Ok(HandlerOutcome::success(result, effects))
}
