//! Invitation capability tokens.
//!
//! A capability token is a compact, stateless credential proving "this email
//! was invited and the invitation has not yet expired". It is three
//! unpadded base64url segments (`header.claims.signature`) where the
//! signature is an HMAC-SHA256 over the first two segments, keyed by a
//! server-held secret injected at construction.
//!
//! Verification is a pure check: callers own any state transition that
//! consumes the capability. Every failure collapses into a single generic
//! [`InvalidInviteToken`] outcome so the verifier cannot be used as an
//! oracle for why a token was rejected; the internal reason is available to
//! server-side logging only.

use anyhow::{bail, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use vouch_core::{current_unix_timestamp, is_expired_unix};

/// Invitations stay redeemable for seven days from issuance.
pub const DEFAULT_INVITE_TTL_SECONDS: u64 = 7 * 86_400;

const INVITE_TOKEN_TYPE: &str = "invite";
const INVITE_HEADER_ALG: &str = "HS256";
const INVITE_HEADER_TYP: &str = "JWT";

const REASON_MALFORMED: &str = "invite_token_malformed";
const REASON_UNSUPPORTED_HEADER: &str = "invite_token_unsupported_header";
const REASON_SIGNATURE_MISMATCH: &str = "invite_token_signature_mismatch";
const REASON_TYPE_MISMATCH: &str = "invite_token_type_mismatch";
const REASON_EXPIRED: &str = "invite_token_expired";

#[derive(Debug, Clone)]
/// Construction-time configuration for [`InviteTokenAuthority`].
pub struct InviteTokenConfig {
    pub secret: String,
    pub ttl_seconds: u64,
}

impl InviteTokenConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds: DEFAULT_INVITE_TTL_SECONDS,
        }
    }
}

/// Identity embedded in a verified invitation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitePayload {
    pub user_id: String,
    pub email: String,
}

/// Generic verification failure.
///
/// The public rendering never distinguishes expired, tampered, or malformed
/// tokens; [`InvalidInviteToken::reason`] exists for log lines only.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid or expired invitation token")]
pub struct InvalidInviteToken {
    reason: &'static str,
}

impl InvalidInviteToken {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }

    /// Internal diagnostic reason code. Never surface this to clients.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct InviteHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct InviteClaims {
    user_id: String,
    email: String,
    #[serde(rename = "type")]
    token_type: String,
    iat: u64,
    exp: u64,
}

/// Mints and validates invitation capability tokens.
pub struct InviteTokenAuthority {
    config: InviteTokenConfig,
}

impl InviteTokenAuthority {
    pub fn new(config: InviteTokenConfig) -> Result<Self> {
        if config.secret.trim().is_empty() {
            bail!("invite token secret cannot be empty");
        }
        if config.ttl_seconds == 0 {
            bail!("invite token ttl must be greater than 0 seconds");
        }
        Ok(Self { config })
    }

    /// Issues a token for `user_id`/`email` as of the supplied clock reading.
    pub fn issue_at(&self, user_id: &str, email: &str, now_unix: u64) -> Result<String> {
        let header = InviteHeader {
            alg: INVITE_HEADER_ALG.to_string(),
            typ: INVITE_HEADER_TYP.to_string(),
        };
        let claims = InviteClaims {
            user_id: user_id.trim().to_string(),
            email: email.trim().to_string(),
            token_type: INVITE_TOKEN_TYPE.to_string(),
            iat: now_unix,
            exp: now_unix.saturating_add(self.config.ttl_seconds),
        };
        let header_segment = BASE64_URL.encode(serde_json::to_vec(&header)?);
        let claims_segment = BASE64_URL.encode(serde_json::to_vec(&claims)?);
        let signature_segment = self.sign_segments(&header_segment, &claims_segment)?;
        Ok(format!(
            "{header_segment}.{claims_segment}.{signature_segment}"
        ))
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String> {
        self.issue_at(user_id, email, current_unix_timestamp())
    }

    /// Validates `token` against the supplied clock reading.
    pub fn verify_at(&self, token: &str, now_unix: u64) -> Result<InvitePayload, InvalidInviteToken> {
        let token = token.trim();
        let mut segments = token.split('.');
        let (Some(header_segment), Some(claims_segment), Some(signature_segment), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(InvalidInviteToken::new(REASON_MALFORMED));
        };
        if header_segment.is_empty() || claims_segment.is_empty() || signature_segment.is_empty() {
            return Err(InvalidInviteToken::new(REASON_MALFORMED));
        }

        let header_bytes = BASE64_URL
            .decode(header_segment)
            .map_err(|_| InvalidInviteToken::new(REASON_MALFORMED))?;
        let header = serde_json::from_slice::<InviteHeader>(&header_bytes)
            .map_err(|_| InvalidInviteToken::new(REASON_MALFORMED))?;
        if header.alg != INVITE_HEADER_ALG || header.typ != INVITE_HEADER_TYP {
            return Err(InvalidInviteToken::new(REASON_UNSUPPORTED_HEADER));
        }

        let signature_bytes = BASE64_URL
            .decode(signature_segment)
            .map_err(|_| InvalidInviteToken::new(REASON_MALFORMED))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.secret.as_bytes())
            .map_err(|_| InvalidInviteToken::new(REASON_SIGNATURE_MISMATCH))?;
        mac.update(header_segment.as_bytes());
        mac.update(b".");
        mac.update(claims_segment.as_bytes());
        mac.verify_slice(&signature_bytes)
            .map_err(|_| InvalidInviteToken::new(REASON_SIGNATURE_MISMATCH))?;

        let claims_bytes = BASE64_URL
            .decode(claims_segment)
            .map_err(|_| InvalidInviteToken::new(REASON_MALFORMED))?;
        let claims = serde_json::from_slice::<InviteClaims>(&claims_bytes)
            .map_err(|_| InvalidInviteToken::new(REASON_MALFORMED))?;
        if claims.token_type != INVITE_TOKEN_TYPE {
            return Err(InvalidInviteToken::new(REASON_TYPE_MISMATCH));
        }
        if is_expired_unix(Some(claims.exp), now_unix) {
            return Err(InvalidInviteToken::new(REASON_EXPIRED));
        }

        Ok(InvitePayload {
            user_id: claims.user_id,
            email: claims.email,
        })
    }

    pub fn verify(&self, token: &str) -> Result<InvitePayload, InvalidInviteToken> {
        self.verify_at(token, current_unix_timestamp())
    }

    fn sign_segments(&self, header_segment: &str, claims_segment: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.secret.as_bytes())
            .map_err(|error| anyhow::anyhow!("failed to initialize invite token mac: {error}"))?;
        mac.update(header_segment.as_bytes());
        mac.update(b".");
        mac.update(claims_segment.as_bytes());
        Ok(BASE64_URL.encode(mac.finalize().into_bytes()))
    }
}
