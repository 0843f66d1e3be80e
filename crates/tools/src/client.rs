//! Circuit-breaker-wrapped RPC client for the external booking/dispatch
//! backend.
//!
//! Grounded on `original_source/.../tools.py`'s `V2Client`: one method
//! per tool, each catching its own failure and returning a neutral
//! document rather than propagating an error, so the state machine can
//! always route forward. The per-call timeout wrap is grounded on
//! `tools/src/registry.rs::ToolExecutor::execute` (`tokio::time::timeout`
//! around the call, `Err` on elapsed).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use voice_agent_core::CircuitBreaker;

use crate::error::{BackendError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifies the call a tool invocation belongs to, echoed back to
/// the backend on every RPC as a `{call:{call_id, from_number,
/// metadata}}` envelope.
#[derive(Debug, Clone)]
pub struct CallRef {
    pub call_id: String,
    pub from_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpcomingAppointment {
    pub date: String,
    pub time: String,
    pub uid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupCallerResponse {
    #[serde(default)]
    pub found: bool,
    #[serde(rename = "customerName", default)]
    pub customer_name: String,
    #[serde(rename = "zipCode", default)]
    pub zip_code: String,
    #[serde(default)]
    pub address: String,
    #[serde(rename = "upcomingAppointment", default)]
    pub upcoming_appointment: Option<UpcomingAppointment>,
    #[serde(rename = "callbackPromise", default)]
    pub callback_promise: String,
    /// Not part of the backend's wire schema; set only by
    /// [`LookupCallerResponse::unavailable`] so callers can surface why
    /// the lookup came back empty.
    #[serde(default)]
    pub message: String,
}

impl LookupCallerResponse {
    fn unavailable() -> Self {
        Self {
            found: false,
            customer_name: String::new(),
            zip_code: String::new(),
            address: String::new(),
            upcoming_appointment: None,
            callback_promise: String::new(),
            message: "Lookup unavailable — proceeding without history.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointmentResponse {
    #[serde(default, alias = "booking_confirmed")]
    pub booked: bool,
    #[serde(default)]
    pub appointment_time: String,
    #[serde(rename = "appointmentId", default)]
    pub appointment_id: String,
    #[serde(rename = "confirmationMessage", default)]
    pub confirmation_message: String,
}

impl BookAppointmentResponse {
    fn unavailable() -> Self {
        Self {
            booked: false,
            appointment_time: String::new(),
            appointment_id: String::new(),
            confirmation_message: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl AckResponse {
    fn unavailable(reason: impl Into<String>) -> Self {
        Self { success: false, error: Some(reason.into()) }
    }
}

pub struct BackendClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
            breaker: Arc::new(CircuitBreaker::new("backend")),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn call_envelope(&self, call: &CallRef, args: Value) -> Value {
        json!({
            "call": {
                "call_id": call.call_id,
                "from_number": call.from_number,
                "metadata": {},
            },
            "args": args,
        })
    }

    async fn post<T>(&self, path: &str, body: Value) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| BackendError::Timeout)??;

        let response = response.error_for_status()?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    pub async fn lookup_caller(&self, call: &CallRef) -> LookupCallerResponse {
        if !self.breaker.should_try() {
            return LookupCallerResponse::unavailable();
        }
        let body = self.call_envelope(call, json!({}));
        match self.post::<LookupCallerResponse>("/webhook/retell/lookup_caller", body).await {
            Ok(resp) => {
                self.breaker.record_success();
                resp
            }
            Err(err) => {
                tracing::warn!(error = %err, "lookup_caller failed");
                self.breaker.record_failure();
                LookupCallerResponse::unavailable()
            }
        }
    }

    pub async fn book_service(
        &self,
        call: &CallRef,
        customer_name: &str,
        issue_description: &str,
        service_address: &str,
        preferred_time: &str,
    ) -> BookAppointmentResponse {
        if !self.breaker.should_try() {
            return BookAppointmentResponse::unavailable();
        }
        let body = self.call_envelope(
            call,
            json!({
                "customer_name": customer_name,
                "customer_phone": call.from_number,
                "issue_description": issue_description,
                "service_address": service_address,
                "preferred_time": preferred_time,
            }),
        );
        match self.post::<BookAppointmentResponse>("/webhook/retell/book_appointment", body).await {
            Ok(resp) => {
                self.breaker.record_success();
                resp
            }
            Err(err) => {
                tracing::warn!(error = %err, "book_service failed");
                self.breaker.record_failure();
                BookAppointmentResponse::unavailable()
            }
        }
    }

    pub async fn create_callback(
        &self,
        call: &CallRef,
        reason: &str,
        callback_type: &str,
        customer_name: &str,
        urgency: &str,
    ) -> AckResponse {
        if !self.breaker.should_try() {
            return AckResponse::unavailable("backend unavailable");
        }
        let body = self.call_envelope(
            call,
            json!({
                "reason": reason,
                "callback_type": callback_type,
                "customer_name": customer_name,
                "urgency": urgency,
            }),
        );
        match self.post::<AckResponse>("/webhook/retell/create_callback", body).await {
            Ok(resp) => {
                self.breaker.record_success();
                resp
            }
            Err(err) => {
                tracing::warn!(error = %err, "create_callback failed");
                self.breaker.record_failure();
                AckResponse::unavailable(err.to_string())
            }
        }
    }

    pub async fn send_sales_lead_alert(&self, call: &CallRef, reason: &str) -> AckResponse {
        if !self.breaker.should_try() {
            return AckResponse::unavailable("backend unavailable");
        }
        let body = self.call_envelope(call, json!({ "reason": reason }));
        match self.post::<AckResponse>("/webhook/retell/send_sales_lead_alert", body).await {
            Ok(resp) => {
                self.breaker.record_success();
                resp
            }
            Err(err) => {
                tracing::warn!(error = %err, "send_sales_lead_alert failed");
                self.breaker.record_failure();
                AckResponse::unavailable(err.to_string())
            }
        }
    }

    /// No Python counterpart exists for this RPC; request shape
    /// follows `create_callback`'s by analogy.
    pub async fn manage_appointment(
        &self,
        call: &CallRef,
        appointment_id: &str,
        action: &str,
        preferred_time: &str,
    ) -> AckResponse {
        if !self.breaker.should_try() {
            return AckResponse::unavailable("backend unavailable");
        }
        let body = self.call_envelope(
            call,
            json!({
                "appointment_id": appointment_id,
                "action": action,
                "preferred_time": preferred_time,
            }),
        );
        match self.post::<AckResponse>("/webhook/retell/manage_appointment", body).await {
            Ok(resp) => {
                self.breaker.record_success();
                resp
            }
            Err(err) => {
                tracing::warn!(error = %err, "manage_appointment failed");
                self.breaker.record_failure();
                AckResponse::unavailable(err.to_string())
            }
        }
    }
}
