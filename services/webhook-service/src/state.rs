use std::sync::Arc;

use crate::analytics::AnalyticsConnector;
use crate::config::HandlerConfig;
use crate::mailgun::SignatureVerifier;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HandlerConfig>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub analytics: Arc<dyn AnalyticsConnector>,
}

impl AppState {
    pub fn new(
        config: HandlerConfig,
        verifier: impl SignatureVerifier + 'static,
        analytics: impl AnalyticsConnector + 'static,
    ) -> Self {
        Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            analytics: Arc::new(analytics),
        }
    }
}
