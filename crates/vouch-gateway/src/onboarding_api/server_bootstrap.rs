//! Onboarding gateway bootstrap and router wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;

use super::{
    handle_complete_setup, handle_complete_setup_code, handle_lookup_user, handle_send_code,
    handle_verify_invite, OnboardingGatewayConfig, OnboardingGatewayState,
    COMPLETE_SETUP_CODE_ENDPOINT, COMPLETE_SETUP_ENDPOINT, LOOKUP_USER_ENDPOINT,
    SEND_CODE_ENDPOINT, VERIFY_INVITE_ENDPOINT,
};

/// Runs the onboarding gateway until ctrl-c.
pub async fn run_onboarding_gateway(config: OnboardingGatewayConfig) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind onboarding gateway on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    println!("onboarding gateway listening: addr={local_addr}");

    let state = Arc::new(OnboardingGatewayState::new(config));
    let app = build_onboarding_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("onboarding gateway exited unexpectedly")?;
    Ok(())
}

pub fn build_onboarding_router(state: Arc<OnboardingGatewayState>) -> Router {
    Router::new()
        .route(SEND_CODE_ENDPOINT, post(handle_send_code))
        .route(LOOKUP_USER_ENDPOINT, post(handle_lookup_user))
        .route(
            COMPLETE_SETUP_CODE_ENDPOINT,
            post(handle_complete_setup_code),
        )
        .route(VERIFY_INVITE_ENDPOINT, post(handle_verify_invite))
        .route(COMPLETE_SETUP_ENDPOINT, post(handle_complete_setup))
        .with_state(state)
}
