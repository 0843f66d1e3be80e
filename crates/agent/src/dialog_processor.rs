//! Turn-by-turn driver that sits between STT and the LLM context
//! aggregator. Single-threaded per call: all `Session` mutation
//! happens through this type.
//!
//! Grounded on `original_source/.../processor.py`'s
//! `StateMachineProcessor`, expanded with a debounce buffer, a
//! terminal-state scoped reply, and a wider extraction gate of
//! `{service_area, discovery, urgency, pre_confirm, confirm}` — the
//! union of this agent's own `{service_area, discovery, urgency,
//! pre_confirm}` and the original's `{service_area, discovery,
//! confirm}` (DESIGN.md open decision (f)).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use voice_agent_core::session::{Session, State};

use voice_agent_backend::{BackendClient, CallRef};
use voice_agent_llm::{apply_extraction, ExtractionProposal, Extractor, LlmBackend, Message};

use crate::state_machine::StateMachine;

/// Minimum gap since the last utterance fragment, and the hard cap on
/// total buffering time, before a debounced turn is flushed
/// downstream. The gap must exceed the transport's VAD stop duration
/// so a caller's natural pause inside one thought doesn't fragment it.
const DEBOUNCE_GAP: Duration = Duration::from_millis(1500);
const DEBOUNCE_MAX_TOTAL: Duration = Duration::from_secs(5);

/// Tokens rejected from a terminal-state scoped LLM reply because they
/// imply the conversation is still collecting booking details.
const BOOKING_LANGUAGE: &[&str] = &["appointment", "schedule", "book", "available", "slot", "open"];

const TERMINAL_REPLY_SYSTEM_PROMPT: &str = "The caller has said something after the call has \
already concluded for this topic. Respond in one short, natural sentence (max 20 words) that does \
not offer to schedule, book, or check availability — those topics are already resolved. If you \
cannot respond without mentioning scheduling, respond with exactly: (silence)";

/// One action the call orchestrator must perform as a result of a
/// turn. Several may be emitted per call to [`DialogProcessor::handle_transcription`].
#[derive(Debug, Clone)]
pub enum OutputFrame {
    /// Speak this text immediately, before any tool call resolves.
    Speak(String),
    /// Forward the (possibly debounce-concatenated) transcription to
    /// the LLM context aggregator so the main dialog LLM replies.
    ForwardToLlm(String),
    /// End the call once the transport finishes draining pending audio.
    EndCallNow,
    /// End the call after `Duration` to let a queued LLM/TTS reply finish.
    EndCallAfter(Duration),
}

struct DebounceBuffer {
    text: String,
    first_fragment_at: Instant,
    last_fragment_at: Instant,
}

impl DebounceBuffer {
    fn new(text: &str) -> Self {
        let now = Instant::now();
        Self { text: text.to_string(), first_fragment_at: now, last_fragment_at: now }
    }

    fn push(&mut self, text: &str) {
        if !text.is_empty() {
            self.text.push(' ');
            self.text.push_str(text);
        }
        self.last_fragment_at = Instant::now();
    }

    fn is_expired(&self) -> bool {
        self.last_fragment_at.elapsed() >= DEBOUNCE_GAP || self.first_fragment_at.elapsed() >= DEBOUNCE_MAX_TOTAL
    }
}

pub struct DialogProcessor {
    pub session: Session,
    machine: StateMachine,
    backend: Arc<BackendClient>,
    call: CallRef,
    llm: Arc<dyn LlmBackend>,
    extractor: Arc<Extractor>,
    /// Index into `llm_context` up to which assistant turns have
    /// already been captured into the transcript.
    agent_cursor: usize,
    debounce: Option<DebounceBuffer>,
    extraction_tx: mpsc::UnboundedSender<ExtractionProposal>,
    extraction_rx: mpsc::UnboundedReceiver<ExtractionProposal>,
}

impl DialogProcessor {
    pub fn new(
        session: Session,
        backend: Arc<BackendClient>,
        llm: Arc<dyn LlmBackend>,
        extractor: Arc<Extractor>,
    ) -> Self {
        let call = CallRef { call_id: session.call_sid.clone(), from_number: session.phone_number.clone() };
        let (extraction_tx, extraction_rx) = mpsc::unbounded_channel();
        Self {
            session,
            machine: StateMachine::new(),
            backend,
            call,
            llm,
            extractor,
            agent_cursor: 0,
            debounce: None,
            extraction_tx,
            extraction_rx,
        }
    }

    /// Merges any extraction proposals that finished since the last
    /// turn. Background extraction runs detached and must never block
    /// a turn, so its result can only rejoin the single-threaded
    /// session state here, at the start of the next turn.
    fn drain_extractions(&mut self) {
        while let Ok(proposal) = self.extraction_rx.try_recv() {
            apply_extraction(&mut self.session, &proposal);
        }
    }

    /// Scans `llm_context` for assistant turns beyond the cursor and
    /// logs each as an agent transcript entry. This is the only path
    /// by which agent speech enters the transcript — the LLM output
    /// stream itself bypasses this processor.
    pub fn capture_agent_responses(&mut self, llm_context: &[Message]) {
        for message in llm_context.iter().skip(self.agent_cursor) {
            if message.role == voice_agent_llm::Role::Assistant {
                self.session.log_agent(&message.content);
            }
        }
        self.agent_cursor = llm_context.len();
    }

    /// Feeds one transcription fragment through the full turn
    /// pipeline: state machine, tool execution, debounce, terminal
    /// routing, background extraction, context preservation, delayed
    /// end. Returns the frames the call orchestrator must act on.
    pub async fn handle_transcription(&mut self, raw_text: &str, llm_context: &mut Vec<Message>) -> Vec<OutputFrame> {
        self.capture_agent_responses(llm_context);
        self.drain_extractions();

        let text = raw_text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        if let Some(buffer) = self.debounce.as_mut() {
            buffer.push(text);
            if !buffer.is_expired() {
                return Vec::new();
            }
            let combined = self.debounce.take().unwrap().text;
            return self.run_turn(&combined, llm_context).await;
        }

        self.run_turn(text, llm_context).await
    }

    /// Call after [`DEBOUNCE_GAP`] has elapsed with no new fragment,
    /// to flush a buffer the caller is tracking via a timer.
    pub async fn flush_debounce(&mut self, llm_context: &mut Vec<Message>) -> Vec<OutputFrame> {
        self.drain_extractions();
        match self.debounce.take() {
            Some(buffer) if buffer.is_expired() => self.run_turn(&buffer.text, llm_context).await,
            other => {
                self.debounce = other;
                Vec::new()
            }
        }
    }

    pub fn is_debouncing(&self) -> bool {
        self.debounce.is_some()
    }

    async fn run_turn(&mut self, text: &str, llm_context: &mut Vec<Message>) -> Vec<OutputFrame> {
        self.session.log_user(text);

        let state_before = self.session.state;
        let action = self.machine.process(&mut self.session, text);

        let mut frames = Vec::new();
        if let Some(speak) = &action.speak {
            frames.push(OutputFrame::Speak(speak.clone()));
        }

        let mut force_llm = false;
        if let Some(tool) = action.call_tool.clone() {
            let result = self.execute_tool(&tool).await;
            self.machine.handle_tool_result(&mut self.session, tool.name, &result);
            self.session.log_tool(tool.name, result);
            if self.session.state != state_before {
                force_llm = true;
            }
        }

        // Background extraction: fires while still in a data-collection
        // state, never blocks this turn's downstream push.
        if matches!(
            self.session.state,
            State::ServiceArea | State::Discovery | State::Urgency | State::PreConfirm | State::Confirm
        ) {
            self.spawn_extraction(llm_context.clone());
        }

        if self.session.state.is_terminal() {
            frames.extend(self.handle_terminal(&action, force_llm).await);
            return frames;
        }

        if !action.needs_llm && !force_llm {
            // Context preservation: the state machine decided the user's
            // text needs no LLM reply and no transition occurred, so it
            // would otherwise never reach the LLM context.
            llm_context.push(Message::user(text));
            return frames;
        }

        if force_llm {
            // A tool call just moved the caller into a new state
            // mid-utterance: buffer this fragment and whatever follows
            // it within the debounce window rather than forwarding a
            // half-finished thought straight to the LLM.
            self.debounce = Some(DebounceBuffer::new(text));
            return frames;
        }

        if action.end_call {
            frames.push(OutputFrame::EndCallAfter(Duration::from_secs(3)));
        }
        frames.push(OutputFrame::ForwardToLlm(text.to_string()));
        frames
    }

    async fn handle_terminal(&mut self, action: &voice_agent_core::Action, force_llm: bool) -> Vec<OutputFrame> {
        let mut frames = Vec::new();

        if !self.session.terminal_reply_used {
            self.session.terminal_reply_used = true;
            if let Some(reply) = self.scoped_terminal_reply().await {
                frames.push(OutputFrame::Speak(reply));
            }
        }

        frames.push(OutputFrame::Speak(terminal_script(&self.session)));

        if action.end_call || force_llm {
            frames.push(OutputFrame::EndCallAfter(Duration::from_secs(3)));
        } else {
            frames.push(OutputFrame::EndCallNow);
        }
        frames
    }

    /// At most one scoped LLM reply per terminal state. Returns `None`
    /// if the reply contains booking language or the LLM call fails —
    /// both cases fall straight through to the canned script.
    async fn scoped_terminal_reply(&self) -> Option<String> {
        let messages = vec![
            Message::system(TERMINAL_REPLY_SYSTEM_PROMPT),
            Message::user(self.session.conversation_history.last().map(|t| t.content.as_str()).unwrap_or("")),
        ];
        let result = self.llm.generate(&messages).await.ok()?;
        let lower = result.text.to_lowercase();
        if result.text.trim() == "(silence)" || BOOKING_LANGUAGE.iter().any(|w| lower.contains(w)) {
            return None;
        }
        Some(result.text)
    }

    fn spawn_extraction(&self, conversation: Vec<Message>) {
        let extractor = Arc::clone(&self.extractor);
        let tx = self.extraction_tx.clone();
        // Orphaned on call end: this task outlives the DialogProcessor
        // if the call ends first, in which case the send below just
        // fails silently on a closed channel.
        tokio::spawn(async move {
            let proposal = extractor.propose(&conversation).await;
            let _ = tx.send(proposal);
        });
    }

    async fn execute_tool(&self, tool: &voice_agent_core::session::ToolCall) -> serde_json::Value {
        let s = &self.session;
        match tool.name {
            "lookup_caller" => {
                let resp = self.backend.lookup_caller(&self.call).await;
                serde_json::json!({
                    "found": resp.found,
                    "customerName": resp.customer_name,
                    "zipCode": resp.zip_code,
                    "address": resp.address,
                    "upcomingAppointment": resp.upcoming_appointment.map(|a| serde_json::json!({
                        "date": a.date, "time": a.time, "uid": a.uid,
                    })),
                    "callbackPromise": resp.callback_promise,
                })
            }
            "book_service" => {
                let resp = self
                    .backend
                    .book_service(&self.call, &s.customer_name, &s.problem_description, &s.service_address, &s.preferred_time)
                    .await;
                serde_json::json!({
                    "booked": resp.booked,
                    "appointment_time": resp.appointment_time,
                    "appointmentId": resp.appointment_id,
                    "confirmationMessage": resp.confirmation_message,
                })
            }
            "create_callback" => {
                let callback_type = if s.lead_type.is_empty() { "service" } else { s.lead_type.as_str() };
                let resp = self
                    .backend
                    .create_callback(&self.call, &s.problem_description, callback_type, &s.customer_name, s.urgency_tier.as_str())
                    .await;
                serde_json::json!({ "success": resp.success, "error": resp.error })
            }
            "send_sales_lead_alert" => {
                let resp = self.backend.send_sales_lead_alert(&self.call, &s.problem_description).await;
                serde_json::json!({ "success": resp.success, "error": resp.error })
            }
            "manage_appointment" => {
                let appointment_id = s.appointment_id.clone();
                let resp = self.backend.manage_appointment(&self.call, &appointment_id, "reschedule", &s.preferred_time).await;
                serde_json::json!({ "success": resp.success, "error": resp.error })
            }
            "end_call" => serde_json::json!({}),
            other => {
                tracing::warn!(tool = other, "unknown tool requested by state machine");
                serde_json::json!({})
            }
        }
    }
}

fn terminal_script(session: &Session) -> String {
    match session.state {
        State::SafetyExit => {
            "Please hang up and call 911. Get everyone outside. We'll follow up once you're safe.".to_string()
        }
        State::Confirm => {
            if !session.confirmation_message.is_empty() {
                session.confirmation_message.clone()
            } else {
                "You're all set. Anything else before I let you go?".to_string()
            }
        }
        State::Callback | State::UrgencyCallback => {
            if !session.callback_promise.is_empty() {
                format!("I'll have someone reach out — {}", session.callback_promise)
            } else {
                "I'll have someone from the team reach out shortly.".to_string()
            }
        }
        State::BookingFailed => {
            "I wasn't able to get that scheduled, but I've flagged it for the team to call you back.".to_string()
        }
        _ => "Thanks for calling. Have a good one.".to_string(),
    }
}
