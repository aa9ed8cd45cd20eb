// router/planner.rs
// Rules-first planner: ordered regex patterns over the inbound message
//
// The first rule whose pattern matches AND whose extracted input validates
// against the tool's schema wins. No match produces an empty plan with a
// human-readable reason. Any fallback planner slotted behind this table must
// produce the same PlannedCall artifact shape.

use gem_types::{PlannedCall, RequestContext};
use regex::{Captures, Regex};
use serde_json::{Map, Value, json};

use crate::registry::Registry;
use crate::validator;

/// One pattern rule. `extract` builds the tool input from the first
/// matching pattern's capture groups.
pub struct PlanRule {
    pub name: &'static str,
    pub patterns: Vec<Regex>,
    pub tool_name: &'static str,
    pub confidence: f32,
    pub extract: fn(&Captures) -> Value,
}

/// Context entity fields the planner may inject after extraction.
const CONTEXT_FIELDS: [&str; 4] = ["lead_id", "quote_id", "job_id", "invoice_id"];

pub struct Planner {
    rules: Vec<PlanRule>,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// Produce the plan for a message: at most one call from the first
    /// matching rule, plus the decision reason.
    pub fn plan(
        &self,
        message: &str,
        context: Option<&RequestContext>,
        registry: &Registry,
    ) -> (Vec<PlannedCall>, String) {
        let message = message.trim();

        for rule in &self.rules {
            for pattern in &rule.patterns {
                let Some(captures) = pattern.captures(message) else {
                    continue;
                };

                let Some(tool) = registry.get(rule.tool_name) else {
                    tracing::warn!(rule = rule.name, tool = rule.tool_name, "rule names unknown tool");
                    continue;
                };

                let mut input = (rule.extract)(&captures);
                fill_from_context(&mut input, context, &tool.input_schema);

                if let Err(ve) = validator::validate(&tool.input_schema, &input) {
                    tracing::debug!(
                        rule = rule.name,
                        "pattern matched but extraction failed validation: {}",
                        ve
                    );
                    continue;
                }

                let call = PlannedCall {
                    tool_name: rule.tool_name.to_string(),
                    input,
                    idempotency_key: None,
                    confidence: rule.confidence,
                };
                let reason = format!("matched rule {:?} -> {}", rule.name, rule.tool_name);
                return (vec![call], reason);
            }
        }

        (
            Vec::new(),
            format!("no rule matched {message:?}; nothing to run"),
        )
    }
}

/// Inject entity ids from the request context, but only into fields the
/// tool's schema declares and extraction left empty.
fn fill_from_context(input: &mut Value, context: Option<&RequestContext>, schema: &Value) {
    let Some(context) = context else { return };
    let Some(obj) = input.as_object_mut() else {
        return;
    };
    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    for field in CONTEXT_FIELDS {
        if !properties.contains_key(field) || obj.contains_key(field) {
            continue;
        }
        let value = match field {
            "lead_id" => context.lead_id.as_deref(),
            "quote_id" => context.quote_id.as_deref(),
            "job_id" => context.job_id.as_deref(),
            "invoice_id" => context.invoice_id.as_deref(),
            _ => None,
        };
        if let Some(value) = value {
            obj.insert(field.to_string(), json!(value));
        }
    }
}

fn cap_str(captures: &Captures, name: &str) -> Option<String> {
    captures
        .name(name)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Dollars (possibly fractional) to integer cents.
fn dollars_to_cents(raw: &str) -> Option<i64> {
    let amount: f64 = raw.replace(',', "").parse().ok()?;
    Some((amount * 100.0).round() as i64)
}

fn regexes(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("planner rule pattern must compile"))
        .collect()
}

fn default_rules() -> Vec<PlanRule> {
    vec![
        PlanRule {
            name: "health_check",
            patterns: regexes(&[r"(?i)\bhealth\s*check\b", r"(?i)^(?:are you|is the system) (?:ok|up|alive)\b"]),
            tool_name: "os.health_check",
            confidence: 0.95,
            extract: |_| json!({}),
        },
        PlanRule {
            name: "new_lead",
            // "new lead: John Smith, 0412 345 678, Clayton, facebook"
            patterns: regexes(&[
                r"(?i)^new lead:?\s*(?P<name>[^,]+),\s*(?P<phone>\+?\d[\d\s]{4,14}\d),\s*(?P<suburb>[^,]+?)(?:,\s*(?P<source>.+))?$",
            ]),
            tool_name: "leads.create",
            confidence: 0.9,
            extract: |caps| {
                json!({
                    "name": cap_str(caps, "name").unwrap_or_default(),
                    "phone": cap_str(caps, "phone").unwrap_or_default().replace(' ', ""),
                    "suburb": cap_str(caps, "suburb").unwrap_or_default(),
                    "source": cap_str(caps, "source").unwrap_or_else(|| "brain".to_string()),
                })
            },
        },
        PlanRule {
            name: "update_stage",
            patterns: regexes(&[
                r"(?i)^(?:move|set|update)\s+lead(?:\s+(?P<lead_id>[\w-]+))?\s+(?:stage\s+)?to\s+(?P<stage>new|contacted|inspection_booked|quoted|won|lost)\b",
            ]),
            tool_name: "leads.update_stage",
            confidence: 0.85,
            extract: |caps| {
                let mut input = json!({
                    "stage": cap_str(caps, "stage").unwrap_or_default().to_lowercase(),
                });
                if let Some(lead_id) = cap_str(caps, "lead_id") {
                    input["lead_id"] = json!(lead_id);
                }
                input
            },
        },
        PlanRule {
            name: "find_lead",
            patterns: regexes(&[r"(?i)^(?:find|look ?up) leads?\s+(?P<query>.+)$"]),
            tool_name: "leads.find",
            confidence: 0.85,
            extract: |caps| json!({"query": cap_str(caps, "query").unwrap_or_default()}),
        },
        PlanRule {
            name: "book_inspection",
            // "book inspection for lead-1 at 2026-08-03T09:00:00Z"
            patterns: regexes(&[
                r"(?i)^book (?:an? )?inspection(?: for (?:lead )?(?P<lead_id>[\w-]+))?(?: (?:at|on) (?P<when>[\dT:+Z\.-]+))?$",
            ]),
            tool_name: "inspections.book",
            confidence: 0.85,
            extract: |caps| {
                let mut input = json!({});
                if let Some(lead_id) = cap_str(caps, "lead_id") {
                    input["lead_id"] = json!(lead_id);
                }
                if let Some(when) = cap_str(caps, "when") {
                    input["scheduled_for"] = json!(when);
                }
                input
            },
        },
        PlanRule {
            name: "create_quote",
            // "quote lead-1 $4200 for full reroof"
            patterns: regexes(&[
                r"(?i)^quote(?: (?:lead )?(?P<lead_id>[\w-]+))? \$(?P<amount>[\d,]+(?:\.\d{1,2})?)(?: for)? (?P<description>.+)$",
            ]),
            tool_name: "quotes.create",
            confidence: 0.85,
            extract: |caps| {
                let mut input = json!({
                    "description": cap_str(caps, "description").unwrap_or_default(),
                });
                if let Some(lead_id) = cap_str(caps, "lead_id") {
                    input["lead_id"] = json!(lead_id);
                }
                if let Some(cents) = cap_str(caps, "amount").and_then(|a| dollars_to_cents(&a)) {
                    input["amount_cents"] = json!(cents);
                }
                input
            },
        },
        PlanRule {
            name: "accept_quote",
            patterns: regexes(&[r"(?i)^accept quote\s+(?P<quote_id>[\w-]+)$"]),
            tool_name: "quotes.accept",
            confidence: 0.9,
            extract: |caps| json!({"quote_id": cap_str(caps, "quote_id").unwrap_or_default()}),
        },
        PlanRule {
            name: "schedule_job",
            patterns: regexes(&[
                r"(?i)^schedule (?:the )?job for quote\s+(?P<quote_id>[\w-]+)(?: on (?P<when>[\dT:+Z\.-]+))?$",
            ]),
            tool_name: "jobs.schedule",
            confidence: 0.85,
            extract: |caps| {
                let mut input = json!({"quote_id": cap_str(caps, "quote_id").unwrap_or_default()});
                if let Some(when) = cap_str(caps, "when") {
                    input["scheduled_for"] = json!(when);
                }
                input
            },
        },
        PlanRule {
            name: "complete_job",
            patterns: regexes(&[r"(?i)^(?:complete|finish) job\s+(?P<job_id>[\w-]+)$"]),
            tool_name: "jobs.complete",
            confidence: 0.9,
            extract: |caps| json!({"job_id": cap_str(caps, "job_id").unwrap_or_default()}),
        },
        PlanRule {
            name: "create_invoice",
            patterns: regexes(&[
                r"(?i)^invoice job\s+(?P<job_id>[\w-]+) \$(?P<amount>[\d,]+(?:\.\d{1,2})?)$",
            ]),
            tool_name: "invoices.create",
            confidence: 0.85,
            extract: |caps| {
                let mut input = json!({"job_id": cap_str(caps, "job_id").unwrap_or_default()});
                if let Some(cents) = cap_str(caps, "amount").and_then(|a| dollars_to_cents(&a)) {
                    input["amount_cents"] = json!(cents);
                }
                input
            },
        },
        PlanRule {
            name: "mark_invoice_paid",
            patterns: regexes(&[r"(?i)^mark invoice\s+(?P<invoice_id>[\w-]+) (?:as )?paid$"]),
            tool_name: "invoices.mark_paid",
            confidence: 0.9,
            extract: |caps| json!({"invoice_id": cap_str(caps, "invoice_id").unwrap_or_default()}),
        },
        PlanRule {
            name: "send_sms",
            // "sms 0412345678: running 20 min late"
            patterns: regexes(&[
                r"(?i)^(?:send )?sms (?:to )?(?P<to>\+?\d[\d\s]{4,14}\d):?\s+(?P<body>.+)$",
            ]),
            tool_name: "comms.send_sms",
            confidence: 0.85,
            extract: |caps| {
                json!({
                    "to": cap_str(caps, "to").unwrap_or_default().replace(' ', ""),
                    "body": cap_str(caps, "body").unwrap_or_default(),
                })
            },
        },
    ]
}
