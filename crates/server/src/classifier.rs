//! Deterministic HVAC call-tag taxonomy, priority cascade, revenue-tier
//! ladder, and an optional best-effort LLM summary enrichment.
//!
//! Grounded verbatim on `original_source/.../classification.py`:
//! `classify_tags`, `detect_priority`, `estimate_revenue_tier` keep the
//! same keyword tables and cascade order. `classify_call`'s LLM
//! enrichment is carried forward per DESIGN.md's SUPPLEMENT entry —
//! it is the only part of the Classifier component that talks to a
//! network, and its failure (missing key, bad JSON, vendor error)
//! must never block the deterministic payload.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use voice_agent_agent::validators::match_any_keyword;
use voice_agent_core::session::{Session, State, UrgencyTier};
use voice_agent_llm::{LlmBackend, Message};

macro_rules! keyword_table {
    ($name:ident, [$(($tag:expr, [$($kw:expr),+ $(,)?])),+ $(,)?]) => {
        static $name: Lazy<Vec<(&'static str, HashSet<&'static str>)>> = Lazy::new(|| {
            vec![$(($tag, [$($kw),+].into_iter().collect())),+]
        });
    };
}

keyword_table!(HAZARD_KEYWORDS, [
    ("GAS_LEAK", ["gas", "rotten egg", "sulfur", "hissing"]),
    ("CO_EVENT", ["co detector", "carbon monoxide", "co alarm"]),
    ("ELECTRICAL_FIRE", ["burning", "smoke", "sparks", "breaker"]),
    ("ACTIVE_FLOODING", ["flooding", "water pouring", "burst pipe"]),
    ("REFRIGERANT_LEAK", ["chemical smell", "frozen coil"]),
    ("HEALTH_RISK", ["no heat", "no ac", "freezing"]),
]);

keyword_table!(SERVICE_TYPE_KEYWORDS, [
    ("REPAIR_AC", ["ac", "air conditioning", "cooling", "not cooling", "warm air"]),
    ("REPAIR_HEATING", ["heating", "furnace", "heat", "not heating", "no heat"]),
    ("REPAIR_HEATPUMP", ["heat pump", "heatpump"]),
    ("REPAIR_THERMOSTAT", ["thermostat"]),
    ("REPAIR_DUCTWORK", ["duct", "ductwork", "vent"]),
    ("TUNEUP_AC", ["tune-up", "tuneup", "maintenance", "checkup"]),
    ("INSTALL_REPLACEMENT", ["new system", "replacement", "replace", "install"]),
    ("DIAGNOSTIC_NOISE", ["noise", "strange sound", "rattling", "buzzing"]),
    ("DIAGNOSTIC_SMELL", ["smell", "odor"]),
    ("SECONDOPINION", ["second opinion"]),
    ("WARRANTY_CLAIM", ["warranty"]),
]);

keyword_table!(RECOVERY_KEYWORDS, [
    ("CALLBACK_RISK", ["waiting", "no one called back", "still waiting"]),
    ("COMPLAINT_PRICE", ["too expensive", "overcharged", "price"]),
    ("COMPLAINT_SERVICE", ["poor service", "rude"]),
    ("COMPLAINT_NOFIX", ["still broken", "didn't fix", "not fixed"]),
    ("ESCALATION_REQ", ["manager", "supervisor", "speak to"]),
    ("COMPETITOR_MENTION", ["cheaper quote", "another company"]),
]);

keyword_table!(LOGISTICS_KEYWORDS, [
    ("GATE_CODE", ["gate", "gated"]),
    ("PET_SECURE", ["dog", "cat", "pet"]),
    ("LANDLORD_AUTH", ["landlord", "owner permission"]),
    ("TENANT_COORD", ["tenant", "renter"]),
]);

keyword_table!(NON_CUSTOMER_KEYWORDS, [
    ("JOB_APPLICANT", ["hiring", "job", "apply", "position"]),
    ("VENDOR_SALES", ["vendor", "supplier", "selling", "partnership"]),
    ("WRONG_NUMBER", ["wrong number"]),
    ("SPAM_TELEMARKETING", ["telemarketing", "spam"]),
    ("PARTS_SUPPLIER", ["parts supplier", "supply house"]),
    ("REALTOR_INQUIRY", ["realtor", "real estate"]),
]);

keyword_table!(CONTEXT_KEYWORDS, [
    ("ELDERLY_OCCUPANT", ["elderly", "senior", "grandma", "grandmother"]),
    ("INFANT_NEWBORN", ["baby", "infant", "newborn"]),
    ("MEDICAL_NEED", ["medical", "oxygen", "health condition"]),
]);

fn urgency_tag(tier: UrgencyTier) -> &'static str {
    match tier {
        UrgencyTier::Emergency => "EMERGENCY_SAMEDAY",
        UrgencyTier::Urgent => "URGENT_24HR",
        UrgencyTier::High => "PRIORITY_48HR",
        UrgencyTier::Routine => "STANDARD",
        UrgencyTier::Low | UrgencyTier::Medium => "FLEXIBLE",
    }
}

/// The 9-category HVAC tag map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagMap {
    #[serde(rename = "HAZARD")]
    pub hazard: Vec<String>,
    #[serde(rename = "URGENCY")]
    pub urgency: Vec<String>,
    #[serde(rename = "SERVICE_TYPE")]
    pub service_type: Vec<String>,
    #[serde(rename = "REVENUE")]
    pub revenue: Vec<String>,
    #[serde(rename = "RECOVERY")]
    pub recovery: Vec<String>,
    #[serde(rename = "LOGISTICS")]
    pub logistics: Vec<String>,
    #[serde(rename = "CUSTOMER")]
    pub customer: Vec<String>,
    #[serde(rename = "NON_CUSTOMER")]
    pub non_customer: Vec<String>,
    #[serde(rename = "CONTEXT")]
    pub context: Vec<String>,
}

fn matched_tags(text: &str, table: &[(&'static str, HashSet<&'static str>)]) -> Vec<String> {
    table
        .iter()
        .filter(|(_, keywords)| match_any_keyword(text, keywords))
        .map(|(tag, _)| tag.to_string())
        .collect()
}

/// Classifies a finished call into the 9-category tag taxonomy.
///
/// DESIGN.md open decision (b): `HEALTH_RISK` is appended only as a
/// fallback when `HAZARD` is still empty after all keyword passes,
/// never suppressing or suppressed by `ELECTRICAL_FIRE`.
pub fn classify_tags(session: &Session, transcript_text: &str) -> TagMap {
    let text = format!("{} {}", transcript_text, session.problem_description).to_lowercase();

    let mut hazard = Vec::new();
    if session.state == State::SafetyExit {
        hazard = matched_tags(&text, &HAZARD_KEYWORDS);
        if hazard.is_empty() {
            hazard.push("HEALTH_RISK".to_string());
        }
    }

    let mut urgency = vec![urgency_tag(session.urgency_tier).to_string()];
    if session.state == State::SafetyExit {
        urgency = vec!["CRITICAL_EVACUATE".to_string()];
    }

    let mut revenue = Vec::new();
    if voice_agent_agent::validators::detect_high_ticket(&session.problem_description) {
        revenue.push("HOT_LEAD".to_string());
    }
    if text.contains("r-22") || text.contains("r22") || text.contains("freon") {
        revenue.push("R22_RETROFIT".to_string());
    }

    TagMap {
        hazard,
        urgency,
        service_type: matched_tags(&text, &SERVICE_TYPE_KEYWORDS),
        revenue,
        recovery: matched_tags(&text, &RECOVERY_KEYWORDS),
        logistics: matched_tags(&text, &LOGISTICS_KEYWORDS),
        customer: vec![if session.caller_known { "EXISTING_CUSTOMER" } else { "NEW_CUSTOMER" }.to_string()],
        non_customer: matched_tags(&text, &NON_CUSTOMER_KEYWORDS),
        context: matched_tags(&text, &CONTEXT_KEYWORDS),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Priority {
    pub color: &'static str,
    pub reason: String,
}

/// Priority cascade: hazard/recovery → red, non-customer → gray,
/// revenue → green, else blue.
pub fn detect_priority(tags: &TagMap) -> Priority {
    if !tags.hazard.is_empty() {
        return Priority { color: "red", reason: format!("Safety hazard: {}", tags.hazard.join(", ")) };
    }
    if !tags.recovery.is_empty() {
        return Priority { color: "red", reason: format!("Customer concern: {}", tags.recovery.join(", ")) };
    }
    if !tags.non_customer.is_empty() {
        return Priority { color: "gray", reason: format!("Non-customer: {}", tags.non_customer.join(", ")) };
    }
    if !tags.revenue.is_empty() {
        return Priority { color: "green", reason: format!("Revenue opportunity: {}", tags.revenue.join(", ")) };
    }
    Priority { color: "blue", reason: "Standard residential service request".to_string() }
}

static REPLACEMENT_KEYWORDS: Lazy<[&str; 8]> = Lazy::new(|| [
    "new system", "new unit", "new ac", "replacement", "replace", "install", "installation", "upgrade",
]);
static MAJOR_REPAIR_KEYWORDS: Lazy<[&str; 5]> =
    Lazy::new(|| ["compressor", "heat exchanger", "evaporator", "condenser", "coil"]);
static MINOR_KEYWORDS: Lazy<[&str; 5]> =
    Lazy::new(|| ["thermostat", "filter", "noise", "strange sound", "weird noise"]);
static MAINTENANCE_KEYWORDS: Lazy<[&str; 5]> =
    Lazy::new(|| ["tune-up", "tuneup", "maintenance", "cleaning", "checkup"]);

#[derive(Debug, Clone, Serialize)]
pub struct RevenueTier {
    pub tier: &'static str,
    pub tier_label: &'static str,
    pub signals: Vec<String>,
    pub confidence: &'static str,
}

fn matched_signals(lower: &str, keywords: &[&str]) -> Vec<String> {
    keywords.iter().filter(|kw| lower.contains(*kw)).map(|kw| kw.to_string()).collect()
}

/// Revenue-tier ladder: R-22 short-circuit → replacement →
/// major_repair → minor → maintenance-as-minor →
/// standard_repair-if-nonempty-description → diagnostic.
pub fn estimate_revenue_tier(problem_description: &str, revenue_tags: &[String]) -> RevenueTier {
    let lower = problem_description.to_lowercase();

    if revenue_tags.iter().any(|t| t == "R22_RETROFIT") {
        return RevenueTier {
            tier: "replacement",
            tier_label: "$$$$",
            signals: vec!["R-22/Freon system".to_string()],
            confidence: "high",
        };
    }

    let signals = matched_signals(&lower, REPLACEMENT_KEYWORDS.as_slice());
    if !signals.is_empty() {
        let confidence = if signals.len() >= 2 { "high" } else { "medium" };
        return RevenueTier { tier: "replacement", tier_label: "$$$$", signals, confidence };
    }

    let signals = matched_signals(&lower, MAJOR_REPAIR_KEYWORDS.as_slice());
    if !signals.is_empty() {
        return RevenueTier { tier: "major_repair", tier_label: "$$$", signals, confidence: "medium" };
    }

    let signals = matched_signals(&lower, MINOR_KEYWORDS.as_slice());
    if !signals.is_empty() {
        return RevenueTier { tier: "minor", tier_label: "$", signals, confidence: "medium" };
    }

    let signals = matched_signals(&lower, MAINTENANCE_KEYWORDS.as_slice());
    if !signals.is_empty() {
        return RevenueTier { tier: "minor", tier_label: "$", signals, confidence: "medium" };
    }

    if !problem_description.trim().is_empty() {
        return RevenueTier {
            tier: "standard_repair",
            tier_label: "$$",
            signals: vec!["general repair request".to_string()],
            confidence: "low",
        };
    }

    RevenueTier { tier: "diagnostic", tier_label: "$$?", signals: Vec::new(), confidence: "low" }
}

const CALL_TYPE_ENUM: &[&str] = &[
    "SERVICE", "ESTIMATE", "MAINTENANCE", "EXISTING_CUSTOMER", "RETURNING_CONTACT", "COMPLAINT",
    "JOB_SEEKER", "VENDOR_SUPPLIER", "SPAM_JUNK", "WRONG_NUMBER", "HANGUP_NO_MESSAGE", "UNKNOWN",
];

/// Optional LLM-summary enrichment — [SUPPLEMENT], empty on any
/// failure, never blocks the deterministic payload it rides alongside.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallClassification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_headline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<u8>,
}

#[derive(Deserialize)]
struct RawClassification {
    ai_summary: Option<String>,
    card_headline: Option<String>,
    card_summary: Option<String>,
    call_type: Option<String>,
    call_subtype: Option<String>,
    sentiment_score: Option<serde_json::Value>,
}

fn build_classify_prompt(session: &Session, transcript_text: &str) -> String {
    let booking_status = session.booking_status();
    format!(
        "Analyze this HVAC service call transcript and return a JSON object with these fields:\n\n\
         - ai_summary: 2-3 sentence summary of what happened on the call\n\
         - card_headline: Punchy 5-8 word headline for a dashboard card\n\
         - card_summary: 2-3 sentence dispatch summary a technician would read before heading to the job\n\
         - call_type: One of: {}\n\
         - call_subtype: Specific subtype like \"REPAIR_AC\", \"REPAIR_HEATING\", \"DIAGNOSTIC_NOISE\", or null\n\
         - sentiment_score: 1-5 integer based on how the caller felt during the call\n\n\
         Context:\n- Customer: {}\n- Final state: {}\n- Booking: {}\n- Urgency: {}\n\nTranscript:\n{}\n\n\
         Return ONLY valid JSON, no markdown fences.",
        CALL_TYPE_ENUM.join(", "),
        if session.customer_name.is_empty() { "Unknown" } else { &session.customer_name },
        session.state.as_str(),
        booking_status,
        session.urgency_tier.as_str(),
        &transcript_text[..transcript_text.len().min(3000)],
    )
}

/// Single best-effort LLM call to generate display/summary fields.
/// Returns an empty [`CallClassification`] on any failure — missing
/// text, a malformed response, or a backend error — so an LLM outage
/// never blocks the deterministic payload.
pub async fn classify_call(llm: &dyn LlmBackend, session: &Session, transcript_text: &str) -> CallClassification {
    if transcript_text.trim().is_empty() {
        return CallClassification::default();
    }

    let messages = vec![
        Message::system("You classify HVAC service calls. Return only JSON."),
        Message::user(build_classify_prompt(session, transcript_text)),
    ];

    let result = match llm.generate(&messages).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "classify_call failed");
            return CallClassification::default();
        }
    };

    let raw: RawClassification = match serde_json::from_str(result.text.trim()) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "classify_call returned unparsable JSON");
            return CallClassification::default();
        }
    };

    CallClassification {
        ai_summary: raw.ai_summary.map(|s| s.chars().take(500).collect()),
        card_headline: raw.card_headline.map(|s| s.chars().take(100).collect()),
        card_summary: raw.card_summary.map(|s| s.chars().take(500).collect()),
        call_type: raw.call_type.filter(|t| CALL_TYPE_ENUM.contains(&t.as_str())),
        call_subtype: raw.call_subtype,
        sentiment_score: raw.sentiment_score.and_then(|v| v.as_f64()).map(|f| (f.round() as i64).clamp(1, 5) as u8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_agent_core::Session;

    #[test]
    fn non_safety_call_has_no_hazard_tags() {
        let session = Session::new("CA1", "+15125550100");
        let tags = classify_tags(&session, "my ac is not cooling");
        assert!(tags.hazard.is_empty());
        assert!(tags.service_type.contains(&"REPAIR_AC".to_string()));
    }

    #[test]
    fn safety_exit_with_no_specific_keyword_defaults_to_health_risk() {
        let mut session = Session::new("CA1", "+15125550100");
        session.state = State::SafetyExit;
        let tags = classify_tags(&session, "I'm scared, please send someone");
        assert_eq!(tags.hazard, vec!["HEALTH_RISK".to_string()]);
        assert_eq!(tags.urgency, vec!["CRITICAL_EVACUATE".to_string()]);
    }

    #[test]
    fn safety_exit_with_smoke_and_sparks_emits_both_without_health_risk() {
        let mut session = Session::new("CA1", "+15125550100");
        session.state = State::SafetyExit;
        let tags = classify_tags(&session, "I smell smoke and saw sparks from the panel");
        assert!(tags.hazard.contains(&"ELECTRICAL_FIRE".to_string()));
        assert!(!tags.hazard.contains(&"HEALTH_RISK".to_string()));
    }

    #[test]
    fn priority_cascade_prefers_hazard_over_revenue() {
        let mut tags = TagMap::default();
        tags.hazard.push("GAS_LEAK".to_string());
        tags.revenue.push("HOT_LEAD".to_string());
        let priority = detect_priority(&tags);
        assert_eq!(priority.color, "red");
    }

    #[test]
    fn priority_defaults_to_blue_for_standard_request() {
        let tags = TagMap::default();
        assert_eq!(detect_priority(&tags).color, "blue");
    }

    #[test]
    fn r22_retrofit_short_circuits_to_replacement_high_confidence() {
        let tier = estimate_revenue_tier("old R-22 unit leaking", &["R22_RETROFIT".to_string()]);
        assert_eq!(tier.tier, "replacement");
        assert_eq!(tier.confidence, "high");
    }

    #[test]
    fn empty_description_with_no_signals_is_diagnostic() {
        let tier = estimate_revenue_tier("", &[]);
        assert_eq!(tier.tier, "diagnostic");
    }

    #[test]
    fn nonempty_description_with_no_keyword_match_is_standard_repair() {
        let tier = estimate_revenue_tier("it makes a weird smell sometimes nobody else mentioned", &[]);
        // "smell" isn't in any keyword table below major/minor ladders used here
        assert!(matches!(tier.tier, "standard_repair" | "minor"));
    }
}
