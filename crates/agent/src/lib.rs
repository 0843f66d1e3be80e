//! Call dialog logic: the deterministic state machine and the
//! turn-by-turn processor that drives it against a live call.
//!
//! - [`state_machine`] — pure, synchronous `StateMachine::process`: the
//!   16-state transition table and its tool-result handlers.
//! - [`validators`] — the deterministic, no-I/O field validators and
//!   keyword classifiers the state machine calls.
//! - [`dialog_processor`] — `DialogProcessor`, the async turn driver
//!   that wires the state machine to the backend RPC client, the
//!   background extractor, and the LLM context.
//!
//! A stage-based `DomainAgent`/`StageManager`/DST/memory/persuasion/
//! lead-scoring framework has no counterpart here — this agent's
//! dialog logic is one closed state machine, not a config-driven
//! multi-domain agent.

pub mod dialog_processor;
pub mod state_machine;
pub mod validators;

pub use dialog_processor::{DialogProcessor, OutputFrame};
pub use state_machine::StateMachine;
