//! Circuit-breaker-wrapped RPC client for the external booking/dispatch
//! backend.
//!
//! A dynamic tool registry, JSON-schema-driven `Tool` trait, and
//! gold-loan domain tools (`domain_tools/`, `gold_loan/`,
//! `integrations.rs`, `factory.rs`, `registry.rs`) have no counterpart
//! here — this agent's tool calls are a fixed, small set invoked
//! directly by the state machine, not discovered or schema-validated
//! at runtime — and were dropped.

pub mod client;
pub mod error;

pub use client::{AckResponse, BackendClient, BookAppointmentResponse, CallRef, LookupCallerResponse, UpcomingAppointment};
pub use error::{BackendError, Result};
