use anyhow::{Result, anyhow};
use log::info;
use std::sync::Arc;
use webrtckit_core::engine::PeerConnectionEngine;
use webrtckit_core::net::HttpClient;

use crate::background::BackgroundStateHandler;
use crate::call::CallViewModel;
use crate::config::KitConfig;
use crate::peer::PeerConnectionManager;
use crate::signaling::SignalingRepository;
use crate::turn::{
    CachedTurnCredentialService, FallbackTurnCredentialService, HttpTurnCredentialService,
    TurnCredentialService,
};

/// A call view model wired to its signaling, credentials and engine.
pub struct WebRtcKit {
    config: KitConfig,
    view_model: Arc<CallViewModel>,
    signaling: Arc<dyn SignalingRepository>,
    credentials: Arc<dyn TurnCredentialService>,
    background: BackgroundStateHandler<CallViewModel>,
}

impl WebRtcKit {
    pub fn builder() -> WebRtcKitBuilder {
        WebRtcKitBuilder::default()
    }

    pub fn config(&self) -> &KitConfig {
        &self.config
    }

    pub fn view_model(&self) -> Arc<CallViewModel> {
        Arc::clone(&self.view_model)
    }

    pub fn signaling(&self) -> Arc<dyn SignalingRepository> {
        Arc::clone(&self.signaling)
    }

    pub fn credentials(&self) -> Arc<dyn TurnCredentialService> {
        Arc::clone(&self.credentials)
    }

    /// Lifecycle hooks for hosts that move between foreground and background.
    pub fn background(&self) -> &BackgroundStateHandler<CallViewModel> {
        &self.background
    }

    pub async fn shutdown(&self) {
        self.view_model.shutdown().await;
    }
}

#[derive(Default)]
pub struct WebRtcKitBuilder {
    config: Option<KitConfig>,
    engine: Option<Arc<dyn PeerConnectionEngine>>,
    signaling: Option<Arc<dyn SignalingRepository>>,
    credentials: Option<Arc<dyn TurnCredentialService>>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl WebRtcKitBuilder {
    pub fn with_config(mut self, config: KitConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn PeerConnectionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_signaling(mut self, signaling: Arc<dyn SignalingRepository>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    /// Replaces the default HTTP credential chain.
    pub fn with_credentials(mut self, credentials: Arc<dyn TurnCredentialService>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Client for the TURN credential API; unused when credentials are set
    /// directly.
    pub fn with_http_client(mut self, http_client: impl HttpClient + 'static) -> Self {
        self.http_client = Some(Arc::new(http_client));
        self
    }

    pub fn build(self) -> Result<WebRtcKit> {
        let config = self.config.unwrap_or_default();
        let signaling = self
            .signaling
            .ok_or_else(|| anyhow!("A signaling repository is required"))?;

        let credentials: Arc<dyn TurnCredentialService> = match (self.credentials, self.http_client)
        {
            (Some(credentials), _) => credentials,
            (None, Some(http_client)) => {
                let http = HttpTurnCredentialService::new(http_client, config.turn_api_url.clone())
                    .with_timeout(config.turn_request_timeout())
                    .with_max_retries(config.turn_max_retries);
                Arc::new(FallbackTurnCredentialService::new(
                    CachedTurnCredentialService::new(http),
                ))
            }
            (None, None) => {
                return Err(anyhow!(
                    "Either a TURN credential service or an HTTP client is required"
                ));
            }
        };

        let engine = match self.engine {
            Some(engine) => engine,
            None => default_engine()?,
        };

        let peer = PeerConnectionManager::new(engine);
        let view_model = Arc::new(CallViewModel::new(
            &config,
            peer,
            Arc::clone(&signaling),
            Arc::clone(&credentials),
        ));
        let background =
            BackgroundStateHandler::with_timeout(Arc::clone(&view_model), config.background_timeout());

        info!("WebRTCKit ready for user {}", config.user_id);
        Ok(WebRtcKit {
            config,
            view_model,
            signaling,
            credentials,
            background,
        })
    }
}

#[cfg(feature = "webrtc-engine")]
fn default_engine() -> Result<Arc<dyn PeerConnectionEngine>> {
    Ok(Arc::new(crate::peer::WebRtcEngine::new()))
}

#[cfg(not(feature = "webrtc-engine"))]
fn default_engine() -> Result<Arc<dyn PeerConnectionEngine>> {
    Err(anyhow!(
        "No peer connection engine set and the webrtc-engine feature is disabled"
    ))
}
