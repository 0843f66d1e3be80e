//! End-to-end seed scenarios driven through [`DialogProcessor`] rather
//! than the state machine directly: a full booking happy path, an
//! immediate safety exit, a backend outage that must not crash a call,
//! and per-call turn-limit escalation.
//!
//! Tool calls here always reach an unreachable backend and come back
//! as the client's graceful "unavailable" document (no test server is
//! started), so states a tool call would otherwise advance are set
//! directly on the session between turns — the same pattern
//! `dialog_processor.rs`'s own unit tests use for the Discovery/Booking
//! boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use voice_agent_agent::DialogProcessor;
use voice_agent_backend::BackendClient;
use voice_agent_core::session::{Session, State, UrgencyTier};
use voice_agent_core::CircuitBreaker;
use voice_agent_llm::{Extractor, FinishReason, GenerationResult, LlmBackend, LlmError, Message};

/// Comfortably clears `DialogProcessor`'s 1.5s debounce gap without
/// depending on its private constant.
const DEBOUNCE_GAP_MARGIN: Duration = Duration::from_millis(1600);

struct StubLlm;

#[async_trait]
impl LlmBackend for StubLlm {
    async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult { text: "Thanks, anything else?".to_string(), finish_reason: FinishReason::Stop, total_time_ms: 1 })
    }
    async fn generate_stream(&self, _messages: &[Message], _tx: tokio::sync::mpsc::Sender<String>) -> Result<GenerationResult, LlmError> {
        unimplemented!("not exercised by these scenarios")
    }
    fn model_name(&self) -> &str {
        "stub"
    }
}

fn processor() -> DialogProcessor {
    let session = Session::new("CA-seed", "+15125550100");
    // Port 1 is never a live backend in CI/sandbox runs, so every RPC
    // exhausts the breaker's single retry and returns the client's
    // built-in "unavailable" document rather than hanging.
    let backend = Arc::new(
        BackendClient::new("http://127.0.0.1:1", None)
            .with_breaker(Arc::new(CircuitBreaker::with_params("backend", 1, Duration::from_secs(60))))
            .with_timeout(Duration::from_millis(200)),
    );
    let llm: Arc<dyn LlmBackend> = Arc::new(StubLlm);
    let extractor = Arc::new(Extractor::new(Arc::clone(&llm)));
    DialogProcessor::new(session, backend, llm, extractor)
}

/// Happy path: welcome through a confirmed booking, simulating each
/// backend round trip's outcome directly since no live backend runs
/// here.
#[tokio::test]
async fn happy_path_reaches_confirm_with_a_booked_appointment() {
    let mut p = processor();
    let mut ctx = Vec::new();

    p.handle_transcription("my AC stopped cooling", &mut ctx).await;
    // lookup_caller resolves within the same turn (no live backend, so
    // it comes back "not found") and its tool-result handler lands a
    // first-time service-intent caller in Safety, arming the debounce
    // buffer since the tool call moved the session mid-utterance.
    assert_eq!(p.session.state, State::Safety);
    assert!(p.is_debouncing());

    // This fragment lands while still buffering, so it only extends
    // the buffer rather than running a turn of its own.
    p.handle_transcription("no nothing like that, just not cooling", &mut ctx).await;
    assert_eq!(p.session.state, State::Safety);
    tokio::time::sleep(DEBOUNCE_GAP_MARGIN).await;
    p.flush_debounce(&mut ctx).await;
    assert!(!p.is_debouncing());
    assert_eq!(p.session.state, State::ServiceArea);

    p.handle_transcription("my zip is 78701", &mut ctx).await;
    assert_eq!(p.session.state, State::Discovery);
    assert_eq!(p.session.zip_code, "78701");

    // problem_description is a background-extraction field, not set
    // from the turn text directly (the extraction firewall), so it is
    // seeded here the way a completed extraction proposal would.
    p.session.customer_name = "Jane Doe".to_string();
    p.session.service_address = "123 Oak St".to_string();
    p.session.problem_description = "the AC unit outside won't turn on".to_string();
    p.handle_transcription("anything else I should know?", &mut ctx).await;
    assert_eq!(p.session.state, State::Urgency);

    p.handle_transcription("this week is fine, no rush", &mut ctx).await;
    assert_eq!(p.session.state, State::PreConfirm);
    assert_eq!(p.session.urgency_tier, UrgencyTier::Routine);

    let frames = p.handle_transcription("yes that sounds good", &mut ctx).await;
    assert!(p.session.booking_attempted);
    assert!(frames.iter().any(|f| matches!(f, voice_agent_agent::OutputFrame::Speak(s) if s.contains("check what we"))));
    // book_service resolves within this same turn; no live backend
    // runs here so the client's failure document routes to
    // BookingFailed. Simulate the success path the same way the
    // backend's real confirmation would drive it.
    assert_eq!(p.session.state, State::BookingFailed);
    p.session.booking_confirmed = true;
    p.session.confirmation_message = "You're booked for Tuesday at 2pm.".to_string();
    p.session.transition(State::Confirm);

    let frames = p.handle_transcription("great, thank you", &mut ctx).await;
    assert_eq!(p.session.state, State::Confirm);
    assert!(p.session.booking_confirmed);
    assert_eq!(p.session.booking_status(), "confirmed");
    assert!(frames.iter().any(|f| matches!(f, voice_agent_agent::OutputFrame::EndCallAfter(_))));
}

/// A safety emergency short-circuits straight to SafetyExit and speaks
/// the one canned safety script, regardless of what state came before.
#[tokio::test]
async fn safety_emergency_short_circuits_to_safety_exit() {
    let mut p = processor();
    p.session.transition(State::Safety);
    let mut ctx = Vec::new();

    let frames = p.handle_transcription("I smell gas in the house", &mut ctx).await;
    assert_eq!(p.session.state, State::SafetyExit);
    assert!(frames.iter().any(|f| matches!(f, voice_agent_agent::OutputFrame::Speak(s) if s.contains("911"))));
    // No tool call drove this transition, so the terminal handler has
    // nothing to wait on and ends the call immediately rather than
    // after a delay.
    assert!(frames.iter().any(|f| matches!(f, voice_agent_agent::OutputFrame::EndCallNow)));
}

/// An unreachable backend must never panic or hang a turn — the tool
/// call resolves to the client's graceful failure document and the
/// state machine's tool-result handler still drives a transition.
#[tokio::test]
async fn backend_outage_does_not_panic_and_still_routes_the_turn() {
    let mut p = processor();
    let mut ctx = Vec::new();

    let frames = tokio::time::timeout(Duration::from_secs(2), p.handle_transcription("my heater is broken", &mut ctx))
        .await
        .expect("a down backend must not hang a turn");

    // The silent lookup tool executes and resolves within the same
    // turn even against a dead backend (graceful failure document, no
    // propagated error), and its result handler still routes onward,
    // arming the debounce buffer since the tool moved the session
    // mid-utterance.
    assert_eq!(p.session.state, State::Safety);
    assert!(!frames.iter().any(|f| matches!(f, voice_agent_agent::OutputFrame::Speak(_))));
    assert!(p.is_debouncing());

    tokio::time::timeout(Duration::from_secs(2), p.handle_transcription("no nothing like that", &mut ctx))
        .await
        .expect("a down backend must not hang a turn");
    tokio::time::sleep(DEBOUNCE_GAP_MARGIN).await;
    let frames2 = tokio::time::timeout(Duration::from_secs(2), p.flush_debounce(&mut ctx))
        .await
        .expect("flushing a debounce buffer must not hang");
    assert_eq!(p.session.state, State::ServiceArea);
    let _ = frames2;
}

/// Exceeding the per-call turn limit escalates to Callback and ends
/// the call, even mid-conversation with no terminal state reached
/// through normal routing.
#[tokio::test]
async fn turn_limit_escalation_forces_callback_and_ends_the_call() {
    let mut p = processor();
    p.session.transition(State::Discovery);
    p.session.customer_name = "Jane Doe".to_string();
    p.session.service_address = "123 Oak St".to_string();
    let mut ctx = Vec::new();

    let mut last_frames = Vec::new();
    for _ in 0..31 {
        p.session.agent_has_responded = true;
        last_frames = p.handle_transcription("still thinking it over", &mut ctx).await;
    }

    assert_eq!(p.session.state, State::Callback);
    assert!(last_frames.iter().any(|f| matches!(f, voice_agent_agent::OutputFrame::EndCallAfter(_))));
}
