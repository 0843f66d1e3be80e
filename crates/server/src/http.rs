//! HTTP admin surface: health check, Prometheus metrics, a fixed TwiML
//! stub, and the carrier WebSocket upgrade.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;

use crate::call::Call;
use crate::state::AppState;

pub fn create_router(state: AppState, prometheus_handle: metrics_exporter_prometheus::PrometheusHandle) -> Router {
    let ws_path = state.settings.server.ws_path.clone();
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(move || metrics_handler(prometheus_handle.clone())))
        .route("/twiml", post(twiml))
        .route(&ws_path, get(ws_media))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics_handler(handle: metrics_exporter_prometheus::PrometheusHandle) -> impl IntoResponse {
    handle.render()
}

/// Fixed minimal TwiML document directing the carrier to open the
/// media-stream WebSocket.
async fn twiml(State(state): State<AppState>) -> impl IntoResponse {
    let ws_url = format!("wss://{}{}", state.settings.server.host, state.settings.server.ws_path);
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Response><Connect><Stream url=\"{ws_url}\" /></Connect></Response>"
    );
    ([(header::CONTENT_TYPE, "text/xml")], body)
}

async fn ws_media(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let stream = match voice_agent_transport::ws::accept(socket).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "media stream handshake failed");
                return;
            }
        };

        let call = Call::new(
            Arc::clone(&state.backend),
            Arc::clone(&state.llm),
            Arc::clone(&state.extractor),
            Arc::clone(&state.stt),
            Arc::clone(&state.tts),
            Arc::clone(&state.dashboard),
            state.settings.dashboard.user_email.clone(),
        );
        call.run(stream).await;
    })
}
