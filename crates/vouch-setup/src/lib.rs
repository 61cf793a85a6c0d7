//! Account setup state machine.
//!
//! Accounts move `UNINITIALIZED → PENDING_SETUP → ACTIVE`. Two independent
//! paths finish the transition: redeeming a signed invitation capability, or
//! presenting a one-time access code requested over email. The only backward
//! transition is the idempotent "issue a new code" re-entry into
//! `PENDING_SETUP`.

mod access_code;
mod service;

pub use access_code::generate_access_code;
pub use service::{
    LookupStatus, OnboardingPolicy, OnboardingService, SetupError, MIN_PASSWORD_CHARS,
};
