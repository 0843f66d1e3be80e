//! Pure, synchronous, deterministic call state machine.
//!
//! Grounded verbatim on `original_source/.../state_machine.py`: the
//! transition table, per-state handlers, and tool-result handlers are
//! carried over field-for-field. The Python original dispatches
//! handlers dynamically via `getattr(self, f"_handle_{state}")`; per
//! DESIGN.md's open-question resolution this is replaced with a closed
//! `match` so an unhandled state is a compile error, not a silent
//! `Action::default()`.

use voice_agent_core::session::{IntentHint, Session, State, ToolCall, UpcomingAppointment};
use voice_agent_core::Action;

use crate::validators::{
    classify_intent, detect_callback_request, detect_high_ticket, detect_safety_emergency,
    is_service_area, validate_address, validate_name, validate_zip, words_to_digits, CallerIntent,
};

const MAX_TURNS_PER_STATE: u32 = 5;
const MAX_TURNS_PER_CALL: u32 = 30;

/// The full legal transition table. Consulted only by tests — handlers
/// below encode the same edges directly, this is the cross-check that
/// a handler never produces an edge the table forbids.
pub fn valid_transitions(state: State) -> &'static [State] {
    use State::*;
    match state {
        Welcome => &[Lookup, NonService, Callback],
        NonService => &[Safety, Callback],
        Lookup => &[Safety, FollowUp, ManageBooking, Callback],
        FollowUp => &[Safety, Callback],
        ManageBooking => &[Confirm, Safety, Callback],
        Safety => &[ServiceArea, SafetyExit],
        ServiceArea => &[Discovery, Callback],
        Discovery => &[Urgency],
        Urgency => &[PreConfirm, UrgencyCallback, Callback],
        PreConfirm => &[Booking, Callback],
        Booking => &[Confirm, BookingFailed],
        SafetyExit | Confirm | Callback | BookingFailed | UrgencyCallback => &[],
    }
}

pub fn available_tools(state: State) -> &'static [&'static str] {
    use State::*;
    match state {
        Welcome => &[],
        NonService => &["create_callback", "end_call"],
        Lookup => &["lookup_caller"],
        FollowUp => &["create_callback", "end_call"],
        ManageBooking => &["manage_appointment", "end_call"],
        Safety => &[],
        SafetyExit => &["end_call"],
        ServiceArea => &["end_call"],
        Discovery => &[],
        Urgency => &[],
        UrgencyCallback => &["create_callback", "send_sales_lead_alert", "end_call"],
        PreConfirm => &[],
        Booking => &["book_service"],
        BookingFailed => &["create_callback", "end_call"],
        Confirm => &["end_call"],
        Callback => &["create_callback", "send_sales_lead_alert", "end_call"],
    }
}

#[derive(Default)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn process(&self, session: &mut Session, user_text: &str) -> Action {
        session.turn_count += 1;

        // Only count a new state turn once the agent has spoken since
        // the last increment: consecutive STT fragments of the same
        // user utterance must not inflate the counter.
        if session.agent_has_responded {
            session.state_turn_count += 1;
            session.agent_has_responded = false;
        }

        if session.turn_count > MAX_TURNS_PER_CALL {
            tracing::warn!(call_sid = %session.call_sid, "per-call turn limit exceeded, escalating to callback");
            session.transition(State::Callback);
            return Action {
                speak: Some(
                    "I apologize, but let me have someone from the team call you back to help you out."
                        .to_string(),
                ),
                call_tool: Some(ToolCall::new("create_callback")),
                end_call: true,
                needs_llm: false,
            };
        }

        if session.state_turn_count > MAX_TURNS_PER_STATE {
            tracing::warn!(call_sid = %session.call_sid, state = session.state.as_str(), "per-state turn limit exceeded");
            session.transition(State::Callback);
            return Action {
                speak: Some("Let me have someone from the team call you back.".to_string()),
                call_tool: Some(ToolCall::new("create_callback")),
                end_call: false,
                needs_llm: false,
            };
        }

        match session.state {
            State::Welcome => self.handle_welcome(session, user_text),
            State::NonService => self.handle_non_service(session, user_text),
            State::Lookup => self.handle_lookup(session, user_text),
            State::FollowUp => self.handle_follow_up(session, user_text),
            State::ManageBooking => self.handle_manage_booking(session, user_text),
            State::Safety => self.handle_safety(session, user_text),
            State::SafetyExit => self.handle_safety_exit(session, user_text),
            State::ServiceArea => self.handle_service_area(session, user_text),
            State::Discovery => self.handle_discovery(session, user_text),
            State::Urgency => self.handle_urgency(session, user_text),
            State::UrgencyCallback => self.handle_urgency_callback(session, user_text),
            State::PreConfirm => self.handle_pre_confirm(session, user_text),
            State::Booking => self.handle_booking(session, user_text),
            State::BookingFailed => self.handle_booking_failed(session, user_text),
            State::Confirm => self.handle_confirm(session, user_text),
            State::Callback => self.handle_callback(session, user_text),
        }
    }

    pub fn handle_tool_result(&self, session: &mut Session, tool: &str, result: &serde_json::Value) {
        match tool {
            "lookup_caller" => self.tool_result_lookup_caller(session, result),
            "book_service" => self.tool_result_book_service(session, result),
            "create_callback" => self.tool_result_create_callback(session, result),
            "send_sales_lead_alert" => {}
            "manage_appointment" => self.tool_result_manage_appointment(session, result),
            _ => tracing::warn!(tool, "no tool-result handler registered"),
        }
    }

    // ── State handlers ──

    fn handle_welcome(&self, session: &mut Session, text: &str) -> Action {
        let intent = classify_intent(text);
        session.intent_hint = match intent {
            CallerIntent::Service => IntentHint::Service,
            CallerIntent::NonService => IntentHint::NonService,
            CallerIntent::FollowUp => IntentHint::FollowUp,
            CallerIntent::ManageBooking => IntentHint::ManageBooking,
        };
        if intent == CallerIntent::NonService {
            session.transition(State::NonService);
            return Action::none();
        }
        // Every service-adjacent intent (service, follow_up, manage_booking) goes
        // through lookup first, silently — no "One moment." filler, so lookup
        // never interrupts the caller.
        session.transition(State::Lookup);
        Action::silent_tool_call(ToolCall::new("lookup_caller"))
    }

    fn handle_non_service(&self, session: &mut Session, text: &str) -> Action {
        let lower = text.to_lowercase();
        let schedule_signals = ["yes", "yeah", "schedule", "book", "sure", "go ahead"];
        if schedule_signals.iter().any(|s| lower.contains(s)) {
            session.transition(State::Safety);
        }
        Action::none()
    }

    fn handle_lookup(&self, _session: &mut Session, _text: &str) -> Action {
        Action::silent_tool_call(ToolCall::new("lookup_caller"))
    }

    fn handle_follow_up(&self, session: &mut Session, text: &str) -> Action {
        let lower = text.to_lowercase();
        let new_issue_signals = ["new issue", "something else", "different problem", "also", "another"];
        let schedule_signals = ["schedule", "book", "appointment"];
        if new_issue_signals.iter().any(|s| lower.contains(s)) || schedule_signals.iter().any(|s| lower.contains(s)) {
            session.transition(State::Safety);
        }
        Action::none()
    }

    fn handle_manage_booking(&self, session: &mut Session, text: &str) -> Action {
        let lower = text.to_lowercase();
        let new_issue_signals = ["new issue", "something else", "different problem", "also broken"];
        if new_issue_signals.iter().any(|s| lower.contains(s)) {
            session.transition(State::Safety);
        }
        Action::none()
    }

    fn handle_safety(&self, session: &mut Session, text: &str) -> Action {
        if detect_safety_emergency(text) {
            session.transition(State::SafetyExit);
            return Action::none();
        }
        let lower = text.to_lowercase();
        let no_signals = [
            "no", "nope", "nah", "nothing like that", "we're fine", "all good",
            "just not cooling", "just not heating",
        ];
        if no_signals.iter().any(|s| lower.contains(s)) {
            session.transition(State::ServiceArea);
        }
        Action::none()
    }

    fn handle_safety_exit(&self, _session: &mut Session, _text: &str) -> Action {
        Action { end_call: true, needs_llm: true, ..Default::default() }
    }

    fn handle_service_area(&self, session: &mut Session, text: &str) -> Action {
        if session.zip_code.is_empty() {
            if let Some(m) = find_five_digit_run(text) {
                session.zip_code = validate_zip(&m);
            }
            if session.zip_code.is_empty() {
                let digit_str = words_to_digits(text);
                if let Some(m) = find_five_digit_run(&digit_str) {
                    session.zip_code = validate_zip(&m);
                }
            }
        }

        if !session.zip_code.is_empty() {
            if is_service_area(&session.zip_code) {
                session.transition(State::Discovery);
            } else {
                session.transition(State::Callback);
            }
        }
        Action::none()
    }

    fn handle_discovery(&self, session: &mut Session, _text: &str) -> Action {
        session.customer_name = validate_name(&session.customer_name);
        session.service_address = validate_address(&session.service_address);

        if !session.customer_name.is_empty()
            && !session.problem_description.is_empty()
            && !session.service_address.is_empty()
        {
            if detect_high_ticket(&session.problem_description) {
                session.lead_type = "high_ticket".to_string();
            }
            session.transition(State::Urgency);
        }
        Action::none()
    }

    fn handle_urgency(&self, session: &mut Session, text: &str) -> Action {
        use voice_agent_core::session::UrgencyTier;

        let lower = text.to_lowercase();

        if detect_callback_request(text) {
            session.transition(State::UrgencyCallback);
            return Action::none();
        }

        if session.lead_type == "high_ticket" {
            session.transition(State::UrgencyCallback);
            return Action::none();
        }

        let urgent_signals = ["today", "asap", "right away", "as soon as", "emergency", "right now"];
        let routine_signals = ["whenever", "this week", "next few days", "no rush", "not urgent"];

        if urgent_signals.iter().any(|s| lower.contains(s)) {
            session.urgency_tier = UrgencyTier::Urgent;
            session.preferred_time = "soonest available".to_string();
            session.transition(State::PreConfirm);
            return Action::none();
        }

        if routine_signals.iter().any(|s| lower.contains(s)) {
            session.urgency_tier = UrgencyTier::Routine;
            session.preferred_time = "soonest available".to_string();
            session.transition(State::PreConfirm);
            return Action::none();
        }

        let time_patterns = [
            "tomorrow", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
            "sunday", "morning", "afternoon", "evening",
        ];
        if time_patterns.iter().any(|p| lower.contains(p)) {
            session.urgency_tier = UrgencyTier::Routine;
            session.preferred_time = text.trim().to_string();
            session.transition(State::PreConfirm);
        }

        Action::none()
    }

    fn handle_urgency_callback(&self, session: &mut Session, _text: &str) -> Action {
        if session.lead_type == "high_ticket" {
            return Action { call_tool: Some(ToolCall::new("send_sales_lead_alert")), needs_llm: true, ..Default::default() };
        }
        if !session.callback_created {
            return Action { call_tool: Some(ToolCall::new("create_callback")), needs_llm: true, ..Default::default() };
        }
        Action { end_call: true, needs_llm: true, ..Default::default() }
    }

    fn handle_pre_confirm(&self, session: &mut Session, text: &str) -> Action {
        let lower = text.to_lowercase();

        if detect_callback_request(text) {
            session.transition(State::Callback);
            return Action::none();
        }

        let yes_signals = ["yes", "yeah", "yep", "sounds right", "sounds good", "correct", "that's right", "go ahead"];
        if yes_signals.iter().any(|s| lower.contains(s)) {
            session.caller_confirmed = true;
            session.booking_attempted = true;
            session.transition(State::Booking);
            return Action {
                speak: Some("Let me check what we've got open.".to_string()),
                call_tool: Some(book_service_call(session)),
                needs_llm: true,
                end_call: false,
            };
        }

        Action::none()
    }

    fn handle_booking(&self, session: &mut Session, _text: &str) -> Action {
        // Booking already fired from PRE_CONFIRM — the caller spoke again
        // while waiting for the backend to respond.
        if session.booking_attempted {
            return Action { needs_llm: false, ..Default::default() };
        }
        session.booking_attempted = true;
        Action::silent_tool_call(book_service_call(session))
    }

    fn handle_booking_failed(&self, session: &mut Session, _text: &str) -> Action {
        if !session.callback_created {
            return Action { call_tool: Some(ToolCall::new("create_callback")), needs_llm: true, ..Default::default() };
        }
        Action { end_call: true, needs_llm: true, ..Default::default() }
    }

    fn handle_confirm(&self, _session: &mut Session, _text: &str) -> Action {
        Action { end_call: true, needs_llm: true, ..Default::default() }
    }

    fn handle_callback(&self, session: &mut Session, _text: &str) -> Action {
        if session.callback_created {
            return Action { end_call: true, needs_llm: true, ..Default::default() };
        }
        if session.callback_attempts >= 2 {
            tracing::warn!(call_sid = %session.call_sid, attempts = session.callback_attempts, "callback creation failed repeatedly");
            return Action { end_call: true, needs_llm: true, ..Default::default() };
        }
        Action { call_tool: Some(ToolCall::new("create_callback")), needs_llm: true, ..Default::default() }
    }

    // ── Tool result handlers ──

    fn tool_result_lookup_caller(&self, session: &mut Session, result: &serde_json::Value) {
        session.caller_known = result.get("found").and_then(|v| v.as_bool()).unwrap_or(false);
        session.customer_name = validate_name(result.get("customerName").and_then(|v| v.as_str()).unwrap_or(""));
        session.zip_code = validate_zip(result.get("zipCode").and_then(|v| v.as_str()).unwrap_or(""));
        session.service_address = validate_address(result.get("address").and_then(|v| v.as_str()).unwrap_or(""));

        let appt = result.get("upcomingAppointment").filter(|v| !v.is_null());
        session.upcoming_appointment = appt.map(|a| UpcomingAppointment {
            date: a.get("date").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            time: a.get("time").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            uid: a
                .get("uid")
                .or_else(|| a.get("jobId"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        });
        session.callback_promise = result.get("callbackPromise").and_then(|v| v.as_str()).unwrap_or("").to_string();

        let has_appointment = session.upcoming_appointment.is_some();
        match session.intent_hint {
            IntentHint::FollowUp => session.transition(State::FollowUp),
            IntentHint::ManageBooking if has_appointment => session.transition(State::ManageBooking),
            _ => session.transition(State::Safety),
        }
    }

    fn tool_result_book_service(&self, session: &mut Session, result: &serde_json::Value) {
        let booked = result.get("booked").and_then(|v| v.as_bool()).unwrap_or(false)
            || result.get("booking_confirmed").and_then(|v| v.as_bool()).unwrap_or(false);
        if booked {
            session.booking_confirmed = true;
            session.booked_time = result
                .get("appointment_time")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            session.appointment_id = result.get("appointmentId").and_then(|v| v.as_str()).unwrap_or("").to_string();
            session.confirmation_message =
                result.get("confirmationMessage").and_then(|v| v.as_str()).unwrap_or("").to_string();
            session.transition(State::Confirm);
        } else {
            session.booking_confirmed = false;
            session.transition(State::BookingFailed);
        }
    }

    fn tool_result_create_callback(&self, session: &mut Session, result: &serde_json::Value) {
        if result.get("error").and_then(|v| v.as_str()).filter(|s| !s.is_empty()).is_some() {
            session.callback_created = false;
            session.callback_attempts += 1;
        } else {
            session.callback_created = true;
        }
    }

    fn tool_result_manage_appointment(&self, session: &mut Session, result: &serde_json::Value) {
        let success = result.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        if success {
            session.transition(State::Confirm);
        }
    }
}

fn book_service_call(session: &Session) -> ToolCall {
    ToolCall::new("book_service")
        .with_arg("customer_name", session.customer_name.clone())
        .with_arg("issue_description", session.problem_description.clone())
        .with_arg("service_address", session.service_address.clone())
        .with_arg("preferred_time", session.preferred_time.clone())
}

fn find_five_digit_run(text: &str) -> Option<String> {
    use once_cell::sync::Lazy;
    use regex::Regex;
    static FIVE_DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{5})\b").unwrap());
    FIVE_DIGIT_RE.captures(text).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("CA1", "+15125550100")
    }

    #[test]
    fn welcome_routes_non_service_intent_away_from_lookup() {
        let sm = StateMachine::new();
        let mut s = session();
        let action = sm.process(&mut s, "I have a billing question");
        assert_eq!(s.state, State::NonService);
        assert!(action.call_tool.is_none());
    }

    #[test]
    fn welcome_routes_service_intent_to_silent_lookup() {
        let sm = StateMachine::new();
        let mut s = session();
        let action = sm.process(&mut s, "my AC is broken");
        assert_eq!(s.state, State::Lookup);
        assert!(action.speak.is_none());
        assert_eq!(action.call_tool.unwrap().name, "lookup_caller");
    }

    #[test]
    fn safety_emergency_routes_to_safety_exit_unless_retracted() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::Safety;
        sm.process(&mut s, "I smell gas");
        assert_eq!(s.state, State::SafetyExit);

        let mut s2 = session();
        s2.state = State::Safety;
        sm.process(&mut s2, "I smell gas but never mind, false alarm");
        assert_eq!(s2.state, State::Safety);
    }

    #[test]
    fn service_area_extracts_spoken_zip_digits() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::ServiceArea;
        sm.process(&mut s, "it's seven eight seven oh one");
        assert_eq!(s.zip_code, "78701");
        assert_eq!(s.state, State::Discovery);
    }

    #[test]
    fn service_area_outside_787_routes_to_callback() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::ServiceArea;
        sm.process(&mut s, "it's 90210");
        assert_eq!(s.state, State::Callback);
    }

    #[test]
    fn discovery_waits_for_all_three_fields() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::Discovery;
        s.customer_name = "Jane Doe".to_string();
        s.service_address = "123 Oak St".to_string();
        sm.process(&mut s, "anything");
        assert_eq!(s.state, State::Discovery);

        s.problem_description = "AC is broken".to_string();
        sm.process(&mut s, "anything");
        assert_eq!(s.state, State::Urgency);
    }

    #[test]
    fn discovery_routes_high_ticket_leads_through_urgency_callback() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::Discovery;
        s.customer_name = "Jane Doe".to_string();
        s.service_address = "123 Oak St".to_string();
        s.problem_description = "looking for a quote on a new system".to_string();
        sm.process(&mut s, "anything");
        assert_eq!(s.state, State::Urgency);
        assert_eq!(s.lead_type, "high_ticket");

        sm.process(&mut s, "today please");
        assert_eq!(s.state, State::UrgencyCallback);
    }

    #[test]
    fn per_state_turn_limit_escalates_to_callback() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::Discovery;
        for _ in 0..6 {
            s.agent_has_responded = true;
            sm.process(&mut s, "still thinking");
        }
        assert_eq!(s.state, State::Callback);
    }

    #[test]
    fn per_call_turn_limit_forces_end_call() {
        let sm = StateMachine::new();
        let mut s = session();
        s.turn_count = MAX_TURNS_PER_CALL;
        let action = sm.process(&mut s, "still going");
        assert!(action.end_call);
        assert_eq!(s.state, State::Callback);
    }

    #[test]
    fn consecutive_stt_fragments_without_agent_reply_do_not_inflate_state_counter() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::Discovery;
        for _ in 0..10 {
            sm.process(&mut s, "um");
        }
        assert_eq!(s.state_turn_count, 0);
    }

    #[test]
    fn pre_confirm_yes_fires_book_service_and_stores_confirmation() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::PreConfirm;
        let action = sm.process(&mut s, "yes that sounds good");
        assert_eq!(s.state, State::Booking);
        assert!(s.booking_attempted);
        assert_eq!(action.call_tool.unwrap().name, "book_service");

        let result = serde_json::json!({
            "booking_confirmed": true,
            "confirmationMessage": "Appointment confirmed for Monday at 2pm",
            "appointmentId": "apt_123",
        });
        sm.handle_tool_result(&mut s, "book_service", &result);
        assert_eq!(s.state, State::Confirm);
        assert_eq!(s.confirmation_message, "Appointment confirmed for Monday at 2pm");
    }

    #[test]
    fn book_service_failure_routes_to_booking_failed() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::Booking;
        s.booking_attempted = true;
        sm.handle_tool_result(&mut s, "book_service", &serde_json::json!({"booked": false}));
        assert_eq!(s.state, State::BookingFailed);
    }

    #[test]
    fn callback_ends_call_after_two_failed_attempts() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::Callback;
        s.callback_attempts = 2;
        let action = sm.process(&mut s, "anything");
        assert!(action.end_call);
    }

    #[test]
    fn every_handled_transition_is_in_the_legal_table() {
        let sm = StateMachine::new();
        let mut s = session();
        s.state = State::Safety;
        sm.process(&mut s, "no nothing like that");
        assert!(valid_transitions(State::Safety).contains(&s.state));
    }
}
