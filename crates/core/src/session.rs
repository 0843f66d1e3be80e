//! Per-call [`Session`] state, the [`State`] enum, and the
//! [`Action`] record the state machine hands back each turn.
//!
//! Grounded on `original_source/.../session.py` and `states.py`,
//! expanded with fields the original dataclass lacks (existing-
//! appointment details, callback metadata, equipment type / problem
//! duration, terminal-reply-used flag, the two append-only logs).

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Conversation state. Partitioned into Decision / Action / Terminal
/// classes; [`State::class`] reports which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Welcome,
    NonService,
    Safety,
    SafetyExit,
    ServiceArea,
    Discovery,
    Urgency,
    UrgencyCallback,
    PreConfirm,
    FollowUp,
    ManageBooking,
    Lookup,
    Booking,
    Confirm,
    Callback,
    BookingFailed,
}

/// The three behavioral classes a [`State`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    Decision,
    Action,
    Terminal,
}

impl State {
    pub fn class(self) -> StateClass {
        use State::*;
        match self {
            Welcome | NonService | Safety | ServiceArea | Discovery | Urgency | PreConfirm
            | FollowUp | ManageBooking => StateClass::Decision,
            Lookup | Booking => StateClass::Action,
            SafetyExit | Confirm | Callback | BookingFailed | UrgencyCallback => {
                StateClass::Terminal
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        self.class() == StateClass::Terminal
    }

    pub fn as_str(self) -> &'static str {
        use State::*;
        match self {
            Welcome => "welcome",
            NonService => "non_service",
            Safety => "safety",
            SafetyExit => "safety_exit",
            ServiceArea => "service_area",
            Discovery => "discovery",
            Urgency => "urgency",
            UrgencyCallback => "urgency_callback",
            PreConfirm => "pre_confirm",
            FollowUp => "follow_up",
            ManageBooking => "manage_booking",
            Lookup => "lookup",
            Booking => "booking",
            Confirm => "confirm",
            Callback => "callback",
            BookingFailed => "booking_failed",
        }
    }
}

/// Urgency tier. Six variants per the resolved open question (a) in
/// `DESIGN.md`: the original source's broader enum including `Urgent`
/// is adopted since the dashboard's `URGENT_24HR` tag has no other
/// source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    #[default]
    Routine,
    Low,
    Medium,
    High,
    Emergency,
    Urgent,
}

impl UrgencyTier {
    pub fn as_str(self) -> &'static str {
        match self {
            UrgencyTier::Routine => "routine",
            UrgencyTier::Low => "low",
            UrgencyTier::Medium => "medium",
            UrgencyTier::High => "high",
            UrgencyTier::Emergency => "emergency",
            UrgencyTier::Urgent => "urgent",
        }
    }
}

/// An upcoming appointment reported by the backend lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpcomingAppointment {
    pub date: String,
    pub time: String,
    pub uid: String,
}

/// One entry in the append-only transcript log. `t` is seconds from
/// call start, matching the transcript-dump schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub t: f64,
    pub role: TranscriptRole,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    User,
    Agent,
    Tool,
}

/// A turn in the LLM-facing conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// The record the state machine returns from `process()` each turn.
/// All fields are optional except the implicit state mutation, which
/// happens on `session` directly rather than here.
#[derive(Debug, Clone, Default)]
pub struct Action {
    pub speak: Option<String>,
    pub call_tool: Option<ToolCall>,
    pub end_call: bool,
    pub needs_llm: bool,
}

impl Action {
    pub fn none() -> Self {
        Self {
            needs_llm: true,
            ..Default::default()
        }
    }

    pub fn speak(text: impl Into<String>) -> Self {
        Self {
            speak: Some(text.into()),
            needs_llm: false,
            ..Default::default()
        }
    }

    pub fn speak_and_end(text: impl Into<String>) -> Self {
        Self {
            speak: Some(text.into()),
            end_call: true,
            needs_llm: false,
            ..Default::default()
        }
    }

    pub fn silent_tool_call(tool: ToolCall) -> Self {
        Self {
            call_tool: Some(tool),
            needs_llm: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: &'static str,
    pub args: HashMap<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }
}

/// Per-call mutable state. A `Call` exclusively owns one `Session`;
/// the state machine and dialog processor are the only writers of the
/// handler-owned fields.
pub struct Session {
    // Identity
    pub call_sid: String,
    pub phone_number: String,
    pub start_time: Instant,

    // Dialog state
    pub state: State,
    pub state_turn_count: u32,
    pub turn_count: u32,
    pub agent_has_responded: bool,

    // Facts from backend lookup (handler-owned)
    pub caller_known: bool,
    pub customer_name: String,
    pub zip_code: String,
    pub service_address: String,
    pub upcoming_appointment: Option<UpcomingAppointment>,
    pub callback_promise: String,

    // Facts from dialog (extractor-owned, or handler for lead_type/urgency)
    pub problem_description: String,
    pub equipment_type: String,
    pub problem_duration: String,
    pub preferred_time: String,
    pub urgency_tier: UrgencyTier,
    pub lead_type: String,

    // Intent hint set in WELCOME, consumed by LOOKUP's tool-result handler
    pub intent_hint: IntentHint,

    pub caller_confirmed: bool,

    // Booking outcome
    pub booking_attempted: bool,
    pub booking_confirmed: bool,
    pub booked_time: String,
    pub confirmation_message: String,
    pub appointment_id: String,

    // Callback outcome
    pub callback_created: bool,
    pub callback_attempts: u32,
    pub callback_type: String,

    pub terminal_reply_used: bool,

    pub conversation_history: Vec<ConversationTurn>,
    pub transcript_log: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntentHint {
    #[default]
    Service,
    NonService,
    FollowUp,
    ManageBooking,
}

impl Session {
    pub fn new(call_sid: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            call_sid: call_sid.into(),
            phone_number: phone_number.into(),
            start_time: Instant::now(),
            state: State::Welcome,
            state_turn_count: 0,
            turn_count: 0,
            agent_has_responded: false,
            caller_known: false,
            customer_name: String::new(),
            zip_code: String::new(),
            service_address: String::new(),
            upcoming_appointment: None,
            callback_promise: String::new(),
            problem_description: String::new(),
            equipment_type: String::new(),
            problem_duration: String::new(),
            preferred_time: String::new(),
            urgency_tier: UrgencyTier::default(),
            lead_type: String::new(),
            intent_hint: IntentHint::default(),
            caller_confirmed: false,
            booking_attempted: false,
            booking_confirmed: false,
            booked_time: String::new(),
            confirmation_message: String::new(),
            appointment_id: String::new(),
            callback_created: false,
            callback_attempts: 0,
            callback_type: String::new(),
            terminal_reply_used: false,
            conversation_history: Vec::new(),
            transcript_log: Vec::new(),
        }
    }

    /// Seconds elapsed since call start, used for transcript rebasing.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Transition to `to`, resetting the per-state turn counter and
    /// the agent-response flag (both reset on every transition per
    /// the original source's `_transition()` helper).
    pub fn transition(&mut self, to: State) {
        self.state = to;
        self.state_turn_count = 0;
        self.agent_has_responded = false;
    }

    pub fn log_user(&mut self, text: &str) {
        self.transcript_log.push(TranscriptEntry {
            t: self.elapsed_secs(),
            role: TranscriptRole::User,
            state: self.state.as_str().to_string(),
            content: Some(text.to_string()),
            name: None,
            result: None,
        });
        self.conversation_history.push(ConversationTurn {
            role: "user".to_string(),
            content: text.to_string(),
        });
    }

    pub fn log_agent(&mut self, text: &str) {
        self.transcript_log.push(TranscriptEntry {
            t: self.elapsed_secs(),
            role: TranscriptRole::Agent,
            state: self.state.as_str().to_string(),
            content: Some(text.to_string()),
            name: None,
            result: None,
        });
        self.agent_has_responded = true;
    }

    pub fn log_tool(&mut self, name: &str, result: serde_json::Value) {
        self.transcript_log.push(TranscriptEntry {
            t: self.elapsed_secs(),
            role: TranscriptRole::Tool,
            state: self.state.as_str().to_string(),
            content: None,
            name: Some(name.to_string()),
            result: Some(result),
        });
    }

    pub fn booking_status(&self) -> &'static str {
        if self.booking_confirmed {
            "confirmed"
        } else if self.state == State::Callback && self.caller_confirmed {
            "attempted_failed"
        } else {
            "not_requested"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_invariant_booking_confirmed_implies_attempted() {
        let mut s = Session::new("CA1", "+15125550100");
        s.booking_confirmed = true;
        s.booking_attempted = true; // invariant must be maintained by callers
        assert!(!s.booking_confirmed || s.booking_attempted);
    }

    #[test]
    fn transition_resets_state_turn_count_and_agent_flag() {
        let mut s = Session::new("CA1", "+15125550100");
        s.state_turn_count = 4;
        s.agent_has_responded = true;
        s.transition(State::ServiceArea);
        assert_eq!(s.state, State::ServiceArea);
        assert_eq!(s.state_turn_count, 0);
        assert!(!s.agent_has_responded);
    }

    #[test]
    fn turn_count_is_never_reset_by_transition() {
        let mut s = Session::new("CA1", "+15125550100");
        s.turn_count = 7;
        s.transition(State::Safety);
        assert_eq!(s.turn_count, 7);
    }

    #[test]
    fn state_classes_partition_correctly() {
        assert_eq!(State::Welcome.class(), StateClass::Decision);
        assert_eq!(State::Lookup.class(), StateClass::Action);
        assert_eq!(State::SafetyExit.class(), StateClass::Terminal);
        assert!(State::Confirm.is_terminal());
        assert!(!State::Discovery.is_terminal());
    }

    #[test]
    fn booking_status_reflects_session_state() {
        let mut s = Session::new("CA1", "+15125550100");
        assert_eq!(s.booking_status(), "not_requested");
        s.state = State::Callback;
        s.caller_confirmed = true;
        assert_eq!(s.booking_status(), "attempted_failed");
        s.booking_confirmed = true;
        assert_eq!(s.booking_status(), "confirmed");
    }
}
