//! Process-wide shared state: one [`AppState`] built once in `main`
//! and cloned (cheaply, via `Arc`) into every accepted call.

use std::sync::Arc;

use voice_agent_backend::BackendClient;
use voice_agent_config::Settings;
use voice_agent_core::CircuitBreaker;
use voice_agent_llm::{Extractor, LlmBackend};
use voice_agent_pipeline::stt::SttBackend;
use voice_agent_pipeline::tts::{TtsBackend, TtsFallback};

use crate::post_call::DashboardClient;

/// Built once from [`Settings`] in `main` and shared read-only across
/// every concurrently accepted call: one breaker instance per
/// dependency per process.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub backend: Arc<BackendClient>,
    pub llm: Arc<dyn LlmBackend>,
    pub extractor: Arc<Extractor>,
    pub stt: Arc<dyn SttBackend>,
    pub tts: Arc<TtsFallback>,
    pub dashboard: Arc<DashboardClient>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        backend: BackendClient,
        llm: Arc<dyn LlmBackend>,
        stt: Arc<dyn SttBackend>,
        tts_primary: Arc<dyn TtsBackend>,
        tts_fallback: Arc<dyn TtsBackend>,
    ) -> Self {
        let settings = Arc::new(settings);
        let tts_breaker = Arc::new(CircuitBreaker::with_params(
            "tts",
            settings.breaker.failure_threshold,
            std::time::Duration::from_secs(settings.breaker.cooldown_secs),
        ));
        let extractor = Arc::new(Extractor::new(Arc::clone(&llm)));
        let dashboard = Arc::new(DashboardClient::new(settings.dashboard.clone()));

        Self {
            backend: Arc::new(backend),
            llm,
            extractor,
            stt,
            tts: Arc::new(TtsFallback::new(tts_primary, tts_fallback, tts_breaker)),
            dashboard,
            settings,
        }
    }
}
