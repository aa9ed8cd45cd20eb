// handlers/leads.rs
// CRM lead tools

use gem_types::Effects;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{HandlerContext, HandlerOutcome, HandlerRegistry, req_str};
use crate::db;
use crate::error::{GemError, Result};

pub fn register(registry: &mut HandlerRegistry) {
    registry.insert("leads.create", |input, ctx| Box::pin(create(input, ctx)));
    registry.insert("leads.update_stage", |input, ctx| {
        Box::pin(update_stage(input, ctx))
    });
    registry.insert("leads.find", |input, ctx| Box::pin(find(input, ctx)));
}

/// Create a lead, deduplicating on phone.
///
/// The existence check is advisory: two workers can both miss it, and the
/// UNIQUE(phone) constraint is the real arbiter. Whoever loses that insert
/// race re-reads the winner's row and reports it as reused.
async fn create(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let name = req_str(&input, "name")?.to_string();
    let phone = req_str(&input, "phone")?.to_string();
    let suburb = req_str(&input, "suburb")?.to_string();
    let source = req_str(&input, "source")?.to_string();

    let lead_id = format!("lead-{}", Uuid::new_v4());

    let (lead, reused) = ctx
        .pool
        .interact_with_retry(move |conn| {
            if let Some(existing) = db::get_lead_by_phone_sync(conn, &phone)? {
                return Ok((existing, true));
            }
            match db::insert_lead_sync(conn, &lead_id, &name, &phone, &suburb, &source) {
                Ok(()) => {}
                Err(e) if db::is_unique_violation(&e) => {
                    // Lost the race: the other writer's row is our result
                    let existing = db::get_lead_by_phone_sync(conn, &phone)?
                        .ok_or_else(|| anyhow::anyhow!("lead vanished after constraint hit"))?;
                    return Ok((existing, true));
                }
                Err(e) => return Err(e.into()),
            }
            let lead = db::get_lead_sync(conn, &lead_id)?
                .ok_or_else(|| anyhow::anyhow!("lead missing after insert"))?;
            Ok((lead, false))
        })
        .await?;

    let effects = Effects::db_write("leads", if reused { "reuse" } else { "insert" }, &lead.id);
    let result = json!({
        "lead_id": lead.id,
        "stage": lead.status,
        "reused": reused,
    });
    Ok(HandlerOutcome::success(result, effects))
}

/// Move a lead to a new pipeline stage.
///
/// The external field is `stage`; the column is `status`. The mapping lives
/// here, at the API boundary, and nowhere else.
async fn update_stage(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let lead_id = req_str(&input, "lead_id")?.to_string();
    let stage = req_str(&input, "stage")?.to_string();

    let updated = {
        let lead_id = lead_id.clone();
        let stage = stage.clone();
        ctx.pool
            .interact(move |conn| Ok(db::update_lead_status_sync(conn, &lead_id, &stage)?))
            .await?
    };
    if updated == 0 {
        return Err(GemError::Handler(format!("lead {lead_id} not found")));
    }

    let effects = Effects::db_write("leads", "update", &lead_id);
    let result = json!({"lead_id": lead_id, "stage": stage});
    Ok(HandlerOutcome::success(result, effects))
}

/// Find leads by phone or name fragment.
async fn find(input: Value, ctx: HandlerContext) -> Result<HandlerOutcome> {
    let query = req_str(&input, "query")?.to_string();
    let limit = input
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(10)
        .min(50) as usize;

    let leads = ctx
        .pool
        .interact(move |conn| Ok(db::find_leads_sync(conn, &query, limit)?))
        .await?;

    let rows: Vec<Value> = leads
        .iter()
        .map(|lead| {
            json!({
                "lead_id": lead.id,
                "name": lead.name,
                "phone": lead.phone,
                "suburb": lead.suburb,
                "stage": lead.status,
            })
        })
        .collect();

    let result = json!({"count": rows.len(), "leads": rows});
    Ok(HandlerOutcome::success(result, Effects::default()))
}
