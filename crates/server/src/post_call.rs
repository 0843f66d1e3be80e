//! Post-call payload assembly, webhook delivery, and the chunked
//! transcript-dump log line.
//!
//! Grounded verbatim on `original_source/.../post_call.py`
//! (`build_job_payload`, `build_call_payload`, `handle_call_ended`) and
//! `dashboard_sync.py`'s `DashboardClient` (shared secret header,
//! independent job/calls/alerts URLs, one retry after a fixed delay on
//! any non-2xx or exception) and `transcript.py` (`to_plain_text`,
//! `to_json_array`, `to_timestamped_dump`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use voice_agent_config::DashboardConfig;
use voice_agent_core::session::{Session, State, TranscriptEntry, TranscriptRole};

use crate::classifier::{classify_tags, detect_priority, estimate_revenue_tier};

/// Max bytes per `TRANSCRIPT_DUMP|i/N|<json>` log line, leaving a
/// small allowance for the `i/N|` header itself.
const DEFAULT_CHUNK_MAX_BYTES: usize = 3500;

pub fn to_plain_text(log: &[TranscriptEntry]) -> String {
    let mut lines = Vec::with_capacity(log.len());
    for entry in log {
        match entry.role {
            TranscriptRole::Agent => lines.push(format!("Agent: {}", entry.content.as_deref().unwrap_or(""))),
            TranscriptRole::User => lines.push(format!("Caller: {}", entry.content.as_deref().unwrap_or(""))),
            TranscriptRole::Tool => lines.push(format!("[Tool: {}]", entry.name.as_deref().unwrap_or(""))),
        }
    }
    lines.join("\n")
}

/// Structured array for the dashboard: `{role, content}` for
/// agent/user, `{role:"tool", name, result}` for tool invocations.
pub fn to_json_array(log: &[TranscriptEntry]) -> Vec<Value> {
    log.iter()
        .map(|entry| match entry.role {
            TranscriptRole::Agent => json!({"role": "agent", "content": entry.content}),
            TranscriptRole::User => json!({"role": "user", "content": entry.content}),
            TranscriptRole::Tool => json!({
                "role": "tool",
                "name": entry.name,
                "result": entry.result.clone().unwrap_or(Value::Null),
            }),
        })
        .collect()
}

fn derive_end_call_reason(session: &Session) -> &'static str {
    if session.state == State::SafetyExit {
        return "safety_emergency";
    }
    if session.state == State::Confirm && session.booking_confirmed {
        return "completed";
    }
    if session.state == State::Callback {
        return if session.lead_type == "high_ticket" { "sales_lead" } else { "callback_later" };
    }
    "customer_hangup"
}

fn map_urgency_for_dashboard(internal: &str) -> &'static str {
    // Dashboard expects low|medium|high|emergency; internal adds routine/urgent.
    match internal {
        "routine" | "low" => "low",
        "medium" => "medium",
        "high" | "urgent" => "high",
        "emergency" => "emergency",
        _ => "low",
    }
}

/// Builds the dashboard job/lead payload: session facts merged with
/// deterministic classifier output.
pub fn build_job_payload(session: &Session, user_email: &str) -> Value {
    let transcript_text = to_plain_text(&session.transcript_log);
    let transcript_obj = to_json_array(&session.transcript_log);

    let tags = classify_tags(session, &transcript_text);
    let priority = detect_priority(&tags);
    let revenue = estimate_revenue_tier(&session.problem_description, &tags.revenue);
    let booking_status = session.booking_status();

    let mut payload = json!({
        "customer_name": if session.customer_name.is_empty() { "Unknown Caller".to_string() } else { session.customer_name.clone() },
        "customer_phone": if session.phone_number.is_empty() { "unknown".to_string() } else { session.phone_number.clone() },
        "customer_address": session.service_address,
        "service_type": "hvac",
        "urgency": map_urgency_for_dashboard(session.urgency_tier.as_str()),
        "user_email": user_email,
        "call_id": session.call_sid,
        "call_transcript": transcript_text,
        "transcript_object": transcript_obj,
        "booking_status": booking_status,
        "end_call_reason": derive_end_call_reason(session),
        "issue_description": session.problem_description,
        "tags": tags,
        "priority_color": priority.color,
        "priority_reason": priority.reason,
        "revenue_tier": revenue.tier,
        "revenue_tier_label": revenue.tier_label,
        "revenue_tier_signals": revenue.signals,
        "revenue_confidence": revenue.confidence,
        "caller_type": "residential",
        "primary_intent": if session.booking_confirmed { "booking_request" } else { "new_lead" },
        "work_type": "service",
    });

    if session.booking_confirmed && !session.booked_time.is_empty() {
        payload["scheduled_at"] = json!(session.booked_time);
    }

    payload
}

/// Builds the call record payload: metadata, ISO-8601 timestamps, a
/// role-filtered transcript (agent/user only — tool entries excluded),
/// and the linking ids from the job POST.
pub fn build_call_payload(session: &Session, user_email: &str, job_lead_id: Option<&str>, job_id: Option<&str>) -> Value {
    let now = chrono::Utc::now();
    let duration_secs = session.elapsed_secs().max(0.0) as i64;
    let started_at = now - chrono::Duration::seconds(duration_secs);

    let transcript_object: Vec<Value> = to_json_array(&session.transcript_log)
        .into_iter()
        .filter(|e| matches!(e.get("role").and_then(|r| r.as_str()), Some("agent") | Some("user")))
        .collect();

    let mut payload = json!({
        "call_id": session.call_sid,
        "phone_number": if session.phone_number.is_empty() { "unknown".to_string() } else { session.phone_number.clone() },
        "customer_name": session.customer_name,
        "user_email": user_email,
        "started_at": started_at.to_rfc3339(),
        "ended_at": now.to_rfc3339(),
        "duration_seconds": duration_secs,
        "direction": "inbound",
        "outcome": derive_end_call_reason(session),
        "urgency_tier": session.urgency_tier.as_str(),
        "problem_description": session.problem_description,
        "booking_status": session.booking_status(),
        "transcript_object": transcript_object,
    });

    if let Some(lead_id) = job_lead_id {
        payload["lead_id"] = json!(lead_id);
    }
    if let Some(id) = job_id {
        payload["job_id"] = json!(id);
    }

    payload
}

/// Fixed 30-minute callback promise attached to every emergency alert.
pub fn build_emergency_alert_payload(session: &Session, user_email: &str) -> Value {
    json!({
        "call_id": session.call_sid,
        "phone_number": if session.phone_number.is_empty() { "unknown".to_string() } else { session.phone_number.clone() },
        "customer_name": session.customer_name,
        "customer_address": session.service_address,
        "problem_description": if session.problem_description.is_empty() { "Safety emergency detected".to_string() } else { session.problem_description.clone() },
        "user_email": user_email,
        "sms_sent_at": chrono::Utc::now().to_rfc3339(),
        "callback_promised_minutes": 30,
    })
}

/// Round-trips session timestamps (`Instant`-based) to seconds since
/// call start and emits the JSON document `to_timestamped_dump`
/// produces for the structured-log transcript line.
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptDump {
    pub call_sid: String,
    pub phone: String,
    pub final_state: String,
    pub duration_s: f64,
    pub entries: Vec<TranscriptEntry>,
}

pub fn build_transcript_dump(session: &Session) -> TranscriptDump {
    TranscriptDump {
        call_sid: session.call_sid.clone(),
        phone: session.phone_number.clone(),
        final_state: session.state.as_str().to_string(),
        duration_s: session.elapsed_secs(),
        entries: session.transcript_log.clone(),
    }
}

/// Splits a [`TranscriptDump`] into `TRANSCRIPT_DUMP|i/N|<json>` lines,
/// each `<= max_bytes`, never splitting an entry across chunks. The
/// first chunk carries the header fields plus as many entries as fit;
/// later chunks carry `{"entries": [...]}` only.
pub fn chunk_transcript_dump(dump: &TranscriptDump, max_bytes: usize) -> Vec<String> {
    // Greedily pack entries into header-carrying and entries-only
    // chunks, measuring against the final serialized line length
    // (including the `TRANSCRIPT_DUMP|i/N|` prefix) so `max_bytes` is
    // the true wire-line budget, not just the JSON payload budget.
    struct Batch {
        header: bool,
        entries: Vec<TranscriptEntry>,
    }
    let mut batches: Vec<Batch> = vec![Batch { header: true, entries: Vec::new() }];

    let line_len = |i: usize, n: usize, json_body: &str| -> usize {
        format!("TRANSCRIPT_DUMP|{}/{}|{}", i, n, json_body).len()
    };

    for entry in &dump.entries {
        let mut placed = false;
        let batches_len = batches.len();
        if let Some(last) = batches.last_mut() {
            let mut candidate = last.entries.clone();
            candidate.push(entry.clone());
            let body = serialize_batch(dump, last.header, &candidate);
            // n is unknown yet; use a generous placeholder count for sizing,
            // corrected on final render below (index digits don't affect
            // whether content fits within a couple bytes of slop).
            if line_len(batches_len, batches_len + 1, &body) <= max_bytes {
                last.entries.push(entry.clone());
                placed = true;
            }
        }
        if !placed {
            batches.push(Batch { header: false, entries: vec![entry.clone()] });
        }
    }

    let n = batches.len();
    batches
        .into_iter()
        .enumerate()
        .map(|(idx, batch)| {
            let body = serialize_batch(dump, batch.header, &batch.entries);
            format!("TRANSCRIPT_DUMP|{}/{}|{}", idx + 1, n, body)
        })
        .collect()
}

fn serialize_batch(dump: &TranscriptDump, header: bool, entries: &[TranscriptEntry]) -> String {
    let value = if header {
        json!({
            "call_sid": dump.call_sid,
            "phone": dump.phone,
            "final_state": dump.final_state,
            "duration_s": dump.duration_s,
            "entries": entries,
        })
    } else {
        json!({ "entries": entries })
    };
    serde_json::to_string(&value).expect("transcript dump entries are always serializable")
}

/// Reassembles a `TRANSCRIPT_DUMP|i/N|<json>` chunk sequence (in any
/// order) back into the ordered entry list. Used by both the
/// production log reader and `demos/transcript_viewer`.
pub fn reassemble_chunks(lines: &[String]) -> Option<Vec<TranscriptEntry>> {
    let mut numbered: Vec<(usize, Vec<TranscriptEntry>)> = Vec::new();
    for line in lines {
        let rest = line.strip_prefix("TRANSCRIPT_DUMP|")?;
        let (header, json_body) = rest.split_once('|')?;
        let (i_str, _n_str) = header.split_once('/')?;
        let i: usize = i_str.parse().ok()?;
        let value: Value = serde_json::from_str(json_body).ok()?;
        let entries: Vec<TranscriptEntry> = serde_json::from_value(value.get("entries")?.clone()).ok()?;
        numbered.push((i, entries));
    }
    numbered.sort_by_key(|(i, _)| *i);
    Some(numbered.into_iter().flat_map(|(_, e)| e).collect())
}

/// Client for the three dashboard webhooks (jobs, calls, emergency
/// alerts), sharing one HTTP client, one secret header, and one retry
/// policy.
pub struct DashboardClient {
    client: reqwest::Client,
    config: DashboardConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookAck {
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
}

impl DashboardClient {
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .expect("reqwest client with static config always builds"),
            config,
        }
    }

    async fn post_with_retry(&self, url: &str, payload: &Value) -> Option<WebhookAck> {
        match self.try_post(url, payload).await {
            Ok(ack) => return Some(ack),
            Err(e) => tracing::warn!(url, error = %e, "dashboard webhook POST failed, retrying once"),
        }
        tokio::time::sleep(std::time::Duration::from_millis(self.config.retry_delay_ms)).await;
        match self.try_post(url, payload).await {
            Ok(ack) => Some(ack),
            Err(e) => {
                tracing::error!(url, error = %e, "dashboard webhook POST failed after retry");
                None
            }
        }
    }

    async fn try_post(&self, url: &str, payload: &Value) -> Result<WebhookAck, reqwest::Error> {
        let response = self
            .client
            .post(url)
            .header("X-Webhook-Secret", &self.config.webhook_secret)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<WebhookAck>().await.unwrap_or_default())
    }

    pub async fn send_job(&self, payload: &Value) -> Option<WebhookAck> {
        self.post_with_retry(&self.config.job_webhook_url, payload).await
    }

    pub async fn send_call(&self, payload: &Value) -> Option<WebhookAck> {
        self.post_with_retry(&self.config.call_webhook_url, payload).await
    }

    pub async fn send_emergency_alert(&self, payload: &Value) -> Option<WebhookAck> {
        self.post_with_retry(&self.config.emergency_webhook_url, payload).await
    }
}

/// Runs the full post-call pipeline, in order: job POST, call POST
/// (gated on the job POST completing first), emergency alert if
/// SAFETY_EXIT, and the chunked transcript dump emitted as a
/// structured-log line sequence. Every step is tolerant of failure —
/// a webhook outage never prevents the others from running.
pub async fn run(dashboard: &DashboardClient, session: &Session, user_email: &str) {
    let job_payload = build_job_payload(session, user_email);
    let job_ack = dashboard.send_job(&job_payload).await;

    let call_payload = build_call_payload(
        session,
        user_email,
        job_ack.as_ref().and_then(|a| a.lead_id.as_deref()),
        job_ack.as_ref().and_then(|a| a.job_id.as_deref()),
    );
    dashboard.send_call(&call_payload).await;

    if session.state == State::SafetyExit {
        let alert_payload = build_emergency_alert_payload(session, user_email);
        dashboard.send_emergency_alert(&alert_payload).await;
    }

    let dump = build_transcript_dump(session);
    for line in chunk_transcript_dump(&dump, DEFAULT_CHUNK_MAX_BYTES) {
        tracing::info!("{line}");
    }

    tracing::info!(
        call_sid = %session.call_sid,
        state = session.state.as_str(),
        booking_confirmed = session.booking_confirmed,
        "post-call complete"
    );
}
