//! Turns the model's raw reply into a [`NarrativeReport`].
//!
//! Model output is frequently wrapped in code fences, double-encoded as a JSON
//! string, or missing whole sections. Normalization repairs what it can and
//! never fails: unparseable text becomes a minimal report whose summary
//! carries the reason, so rendering always sees every field.

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::{MethodologyStep, NarrativeReport, PenetrationFinding, Vulnerability};

pub const NO_SUMMARY: &str = "No summary available.";
pub const NO_OBJECTIVE: &str = "No objective provided.";
pub const NO_REQUIREMENTS: &str = "No requirements specified.";
pub const UNKNOWN_CVE: &str = "Unknown CVE";
pub const UNKNOWN_SEVERITY: &str = "Unknown";
pub const NO_EXPLOITATION: &str = "No detailed exploitation provided.";
pub const NO_POC: &str = "No PoC provided.";

pub fn normalize(raw_text: &str, domain: &str) -> NarrativeReport {
    normalize_at(raw_text, domain, Utc::now())
}

pub fn normalize_at(raw_text: &str, domain: &str, now: DateTime<Utc>) -> NarrativeReport {
    let generated_at = now.trunc_subsecs(0);
    let text = strip_fences(raw_text);
    let text = unwrap_quoted(text);

    let parsed: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            warn!(domain, error = %e, "model output is not valid JSON");
            return failure_report(domain, generated_at, &format!("invalid JSON: {e}"));
        }
    };

    let Value::Object(fields) = parsed else {
        warn!(domain, "model output is not a JSON object");
        return failure_report(domain, generated_at, "response is not a JSON object");
    };

    from_fields(&fields, domain, generated_at)
}

fn strip_fences(raw: &str) -> &str {
    let text = raw.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let rest = rest.trim();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Decodes one level of JSON string escaping when the whole document arrived
/// as a string literal.
fn unwrap_quoted(text: &str) -> String {
    if text.len() < 2 || !text.starts_with('"') || !text.ends_with('"') {
        return text.to_string();
    }
    match serde_json::from_str::<String>(text) {
        Ok(inner) => {
            debug!("decoded string-wrapped model output");
            inner.trim().to_string()
        }
        Err(e) => {
            warn!(error = %e, "string-wrapped model output did not decode, stripping quotes");
            text[1..text.len() - 1].to_string()
        }
    }
}

fn failure_report(domain: &str, generated_at: DateTime<Utc>, reason: &str) -> NarrativeReport {
    NarrativeReport {
        domain: domain.to_string(),
        generated_at,
        summary: format!("Error: {reason}"),
        objective: String::new(),
        requirements: vec![NO_REQUIREMENTS.to_string()],
        recommendations: vec![],
        methodology: vec![],
        vulnerabilities: vec![],
        penetration: vec![],
        table_of_contents: vec![],
        high_level_summary: String::new(),
        maintaining_access: String::new(),
        house_cleaning: String::new(),
        additional_notes: String::new(),
    }
}

fn from_fields(
    fields: &Map<String, Value>,
    domain: &str,
    generated_at: DateTime<Utc>,
) -> NarrativeReport {
    let mut requirements = string_list(fields.get("requirements"));
    if requirements.is_empty() {
        requirements.push(NO_REQUIREMENTS.to_string());
    }

    let vulnerabilities: Vec<Vulnerability> = entries(fields.get("vulnerabilities"))
        .map(|entry| Vulnerability {
            cve_id: text_field(entry, "cve_id").unwrap_or_else(|| UNKNOWN_CVE.to_string()),
            severity: text_field(entry, "severity")
                .unwrap_or_else(|| UNKNOWN_SEVERITY.to_string()),
        })
        .collect();

    let mut penetration: Vec<PenetrationFinding> = entries(fields.get("penetration"))
        .map(|entry| PenetrationFinding {
            vulnerability_exploited: text_field(entry, "vulnerability_exploited")
                .unwrap_or_else(|| UNKNOWN_CVE.to_string()),
            system_vulnerable: text_field(entry, "system_vulnerable")
                .unwrap_or_else(|| domain.to_string()),
            description: text_field(entry, "description")
                .unwrap_or_else(|| NO_EXPLOITATION.to_string()),
            severity: text_field(entry, "severity")
                .unwrap_or_else(|| UNKNOWN_SEVERITY.to_string()),
            proof_of_concept: text_field(entry, "proof_of_concept")
                .unwrap_or_else(|| NO_POC.to_string()),
        })
        .collect();

    if penetration.is_empty() && !vulnerabilities.is_empty() {
        debug!(
            domain,
            count = vulnerabilities.len(),
            "synthesizing penetration entries from vulnerabilities"
        );
        penetration = vulnerabilities
            .iter()
            .map(|v| PenetrationFinding {
                vulnerability_exploited: v.cve_id.clone(),
                system_vulnerable: domain.to_string(),
                description: NO_EXPLOITATION.to_string(),
                severity: v.severity.clone(),
                proof_of_concept: NO_POC.to_string(),
            })
            .collect();
    }

    NarrativeReport {
        domain: domain.to_string(),
        generated_at,
        summary: text_or(fields.get("summary"), NO_SUMMARY),
        objective: text_or(fields.get("objective"), NO_OBJECTIVE),
        requirements,
        recommendations: string_list(fields.get("recommendations")),
        methodology: entries(fields.get("methodology"))
            .map(|entry| MethodologyStep {
                title: text_field(entry, "title").unwrap_or_default(),
                description: text_field(entry, "description").unwrap_or_default(),
                evidence: text_field(entry, "evidence").unwrap_or_default(),
            })
            .collect(),
        vulnerabilities,
        penetration,
        table_of_contents: string_list(fields.get("table_of_contents")),
        high_level_summary: text_or(fields.get("high_level_summary"), ""),
        maintaining_access: text_or(fields.get("maintaining_access"), ""),
        house_cleaning: text_or(fields.get("house_cleaning"), ""),
        additional_notes: text_or(fields.get("additional_notes"), ""),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Missing, null and blank values all take the placeholder.
fn text_or(value: Option<&Value>, placeholder: &str) -> String {
    value
        .and_then(as_text)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| placeholder.to_string())
}

/// A bare value becomes a one-element list.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => vec![],
        Some(Value::Array(items)) => items.iter().filter_map(as_text).collect(),
        Some(other) => as_text(other).into_iter().collect(),
    }
}

/// Sequence elements of a structured field. A single object is treated as a
/// one-element sequence.
fn entries(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    let items: &[Value] = match value {
        Some(Value::Array(items)) => items.as_slice(),
        Some(single) if single.is_object() => std::slice::from_ref(single),
        _ => &[],
    };
    items.iter().filter(|v| !v.is_null())
}

/// Reads `key` from an object entry. A scalar entry stands in for the
/// entry's leading field, so `"CVE-2024-1"` in a vulnerability list still
/// yields its `cve_id`.
fn text_field(entry: &Value, key: &str) -> Option<String> {
    match entry {
        Value::Object(map) => map.get(key).and_then(as_text),
        scalar if is_leading_field(key) => as_text(scalar),
        _ => None,
    }
}

fn is_leading_field(key: &str) -> bool {
    matches!(key, "cve_id" | "vulnerability_exploited" | "title")
}
