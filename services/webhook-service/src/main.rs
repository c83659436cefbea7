//! Mailgun webhook to PostHog bridge.
//!
//! Each request is verified against the Mailgun signing key, mapped onto a
//! single PostHog capture, and flushed before the response goes out.

mod analytics;
mod app;
mod config;
mod error;
mod handlers;
mod logic;
mod mailgun;
mod models;
mod state;

use std::process::ExitCode;

use mailbridge_common::{bind_listener, init_tracing, shutdown_signal};

use crate::analytics::PosthogConnector;
use crate::app::build_router;
use crate::config::HandlerConfig;
use crate::mailgun::MailgunVerifier;
use crate::state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let _guards = init_tracing("webhook-service");

    let config = match HandlerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialise config");
            return ExitCode::FAILURE;
        }
    };

    let analytics = match PosthogConnector::new(
        config.posthog_api_key.as_str(),
        &config.posthog_endpoint,
        config.posthog_timeout,
    ) {
        Ok(analytics) => analytics,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialise posthog");
            return ExitCode::FAILURE;
        }
    };
    let verifier = MailgunVerifier::new(
        config.mailgun_domain.as_str(),
        config.mailgun_private_api_key.as_str(),
    );

    let port = config.port;
    tracing::info!(
        port,
        mailgun_domain = %verifier.domain(),
        posthog_endpoint = %config.posthog_endpoint,
        user_id_variable_key = %config.user_id_variable_key,
        additional_user_variables = ?config.additional_user_variables,
        "starting webhook service"
    );

    let app = build_router(AppState::new(config, verifier, analytics));
    let listener = match bind_listener(port).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, port, "bind listener failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
