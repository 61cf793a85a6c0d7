//! HTTP JSON surface for the signed-capability onboarding flows.

pub mod onboarding_api;
