//! Background session-field extraction.
//!
//! Grounded on `original_source/.../processor.py::_run_extraction`: a
//! non-blocking LLM call that proposes values for a handful of
//! dialog-owned fields from the recent conversation, gated to the
//! data-collection states and firewalled so it can only ever *fill in*
//! a field that is still empty — it never overwrites a value a
//! handler or an earlier extraction pass already set, and it never
//! touches `zip_code`, which only a handler may write. Errors are
//! logged, never surfaced — a flaky extractor must never abort a turn.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::backend::LlmBackend;
use crate::prompt::Message;

/// Extractor-owned fields proposed from conversation so far. `None`
/// means "the extractor didn't find this field this pass" — distinct
/// from an empty string, which would otherwise overwrite nothing
/// anyway since `apply` only fills fields that are still unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionProposal {
    pub problem_description: Option<String>,
    pub equipment_type: Option<String>,
    pub problem_duration: Option<String>,
    pub preferred_time: Option<String>,
    pub customer_name: Option<String>,
    pub service_address: Option<String>,
}

impl ExtractionProposal {
    pub fn empty() -> Self {
        Self::default()
    }
}

const SYSTEM_PROMPT: &str = "Read the conversation and extract, if mentioned, the caller's \
HVAC problem description, equipment type (e.g. furnace, AC, heat pump), how long the problem \
has been occurring, any preferred appointment time, the caller's name, and their service \
address. Respond with only a JSON object with keys problem_description, equipment_type, \
problem_duration, preferred_time, customer_name, service_address. Omit a key entirely if it \
was not mentioned. Do not invent values.";

pub struct Extractor {
    backend: Arc<dyn LlmBackend>,
    /// Background extraction timeout, 10s by default.
    timeout: Duration,
}

impl Extractor {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend, timeout: Duration::from_secs(10) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Propose field values from `conversation`. Never returns an
    /// error: any failure (timeout, network, malformed JSON) is logged
    /// and an empty proposal is returned so the caller can merge it
    /// unconditionally.
    pub async fn propose(&self, conversation: &[Message]) -> ExtractionProposal {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(SYSTEM_PROMPT));
        messages.extend_from_slice(conversation);

        let call = self.backend.generate(&messages);
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!("background extraction failed: {e}");
                return ExtractionProposal::empty();
            }
            Err(_) => {
                tracing::warn!("background extraction timed out after {:?}", self.timeout);
                return ExtractionProposal::empty();
            }
        };

        match parse_proposal(&result.text) {
            Some(proposal) => proposal,
            None => {
                tracing::warn!("background extraction returned unparseable JSON");
                ExtractionProposal::empty()
            }
        }
    }
}

fn parse_proposal(text: &str) -> Option<ExtractionProposal> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Merge `proposal` into `session`'s extractor-fillable fields,
/// skipping any field that is already non-empty. `customer_name` and
/// `service_address` are also handler-owned (a handler may set them
/// directly from caller lookup or confirmed dialog), so this is a
/// fill-only-if-empty merge, not an exclusive write — and it never
/// touches `zip_code`, which only a handler may write.
pub fn apply_extraction(session: &mut voice_agent_core::Session, proposal: &ExtractionProposal) {
    if session.problem_description.is_empty() {
        if let Some(v) = &proposal.problem_description {
            if !v.trim().is_empty() {
                session.problem_description = v.trim().to_string();
            }
        }
    }
    if session.equipment_type.is_empty() {
        if let Some(v) = &proposal.equipment_type {
            if !v.trim().is_empty() {
                session.equipment_type = v.trim().to_string();
            }
        }
    }
    if session.problem_duration.is_empty() {
        if let Some(v) = &proposal.problem_duration {
            if !v.trim().is_empty() {
                session.problem_duration = v.trim().to_string();
            }
        }
    }
    if session.preferred_time.is_empty() {
        if let Some(v) = &proposal.preferred_time {
            if !v.trim().is_empty() {
                session.preferred_time = v.trim().to_string();
            }
        }
    }
    if session.customer_name.is_empty() {
        if let Some(v) = &proposal.customer_name {
            if !v.trim().is_empty() {
                session.customer_name = v.trim().to_string();
            }
        }
    }
    if session.service_address.is_empty() {
        if let Some(v) = &proposal.service_address {
            if !v.trim().is_empty() {
                session.service_address = v.trim().to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_agent_core::Session;

    #[test]
    fn parse_proposal_extracts_json_embedded_in_prose() {
        let text = "Sure, here you go:\n{\"problem_description\": \"no heat\"}\nHope that helps.";
        let proposal = parse_proposal(text).unwrap();
        assert_eq!(proposal.problem_description.as_deref(), Some("no heat"));
        assert!(proposal.equipment_type.is_none());
    }

    #[test]
    fn parse_proposal_rejects_non_json() {
        assert!(parse_proposal("no json here").is_none());
    }

    #[test]
    fn apply_extraction_fills_empty_fields_only() {
        let mut session = Session::new("CA1", "+15125550100");
        session.equipment_type = "furnace".to_string();
        let proposal = ExtractionProposal {
            problem_description: Some("no heat".to_string()),
            equipment_type: Some("air conditioner".to_string()),
            ..Default::default()
        };
        apply_extraction(&mut session, &proposal);
        assert_eq!(session.problem_description, "no heat");
        assert_eq!(session.equipment_type, "furnace", "already-set field must not be overwritten");
    }

    #[test]
    fn apply_extraction_never_touches_zip_code() {
        let mut session = Session::new("CA1", "+15125550100");
        session.zip_code = "78701".to_string();
        let proposal = ExtractionProposal {
            customer_name: Some("Jane Doe".to_string()),
            service_address: Some("123 Oak St".to_string()),
            ..Default::default()
        };
        apply_extraction(&mut session, &proposal);
        assert_eq!(session.zip_code, "78701");
    }

    #[test]
    fn apply_extraction_fills_empty_name_and_address() {
        let mut session = Session::new("CA1", "+15125550100");
        let proposal = ExtractionProposal {
            customer_name: Some("Jane Doe".to_string()),
            service_address: Some("123 Oak St".to_string()),
            ..Default::default()
        };
        apply_extraction(&mut session, &proposal);
        assert_eq!(session.customer_name, "Jane Doe");
        assert_eq!(session.service_address, "123 Oak St");
    }

    #[test]
    fn apply_extraction_does_not_overwrite_known_name() {
        let mut session = Session::new("CA1", "+15125550100");
        session.customer_name = "John Smith".to_string();
        let proposal = ExtractionProposal { customer_name: Some("Jane Doe".to_string()), ..Default::default() };
        apply_extraction(&mut session, &proposal);
        assert_eq!(session.customer_name, "John Smith");
    }

    #[test]
    fn apply_extraction_ignores_blank_proposed_values() {
        let mut session = Session::new("CA1", "+15125550100");
        let proposal = ExtractionProposal {
            problem_description: Some("   ".to_string()),
            ..Default::default()
        };
        apply_extraction(&mut session, &proposal);
        assert_eq!(session.problem_description, "");
    }
}
