use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use vouch_capability::{InvitePayload, InviteTokenAuthority};
use vouch_core::current_unix_timestamp_ms;
use vouch_directory::{AccountDirectory, AccountRecord, DirectoryError, SetupCommit};
use vouch_mailer::{AccessCodeMailer, MailerError};

use crate::access_code::generate_access_code;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Debug, Error)]
/// Enumerates supported `SetupError` values.
///
/// Variant display strings are the exact single-sentence messages surfaced
/// to clients; they never carry stored or received credential material.
pub enum SetupError {
    #[error("{0}")]
    MissingFields(&'static str),
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    #[error("Invalid or expired invitation")]
    InvalidOrExpiredCapability,
    #[error("Invalid access code")]
    InvalidAccessCode,
    #[error("User not found")]
    UserNotFound,
    #[error("Internal error")]
    UpstreamUpdateFailure(#[source] DirectoryError),
    #[error("Failed to send code")]
    DispatchFailure(#[source] MailerError),
}

/// Outcome of an account lookup by email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStatus {
    Unknown,
    SetupRequired { email: String },
    Active { email: String },
}

impl LookupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::SetupRequired { .. } => "setup_required",
            Self::Active { .. } => "active",
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Unknown => None,
            Self::SetupRequired { email } | Self::Active { email } => Some(email),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Policy knobs for the setup transitions.
pub struct OnboardingPolicy {
    /// Accept a capability token against an account whose setup already
    /// completed. Off by default: a consumed invitation stays consumed.
    pub allow_token_resubmission: bool,
}

/// Drives the setup state machine over the directory, the mailer, and the
/// capability token authority.
pub struct OnboardingService {
    directory: Arc<dyn AccountDirectory>,
    mailer: Arc<dyn AccessCodeMailer>,
    tokens: InviteTokenAuthority,
    policy: OnboardingPolicy,
}

impl OnboardingService {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        mailer: Arc<dyn AccessCodeMailer>,
        tokens: InviteTokenAuthority,
        policy: OnboardingPolicy,
    ) -> Self {
        Self {
            directory,
            mailer,
            tokens,
            policy,
        }
    }

    /// Reports whether `email` is unknown, mid-setup, or active.
    pub async fn lookup(&self, email: &str) -> Result<LookupStatus, SetupError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SetupError::MissingFields("Email required"));
        }
        let Some(account) = self.find_account(email).await? else {
            return Ok(LookupStatus::Unknown);
        };
        if account.is_pending_setup() {
            Ok(LookupStatus::SetupRequired {
                email: account.email,
            })
        } else {
            Ok(LookupStatus::Active {
                email: account.email,
            })
        }
    }

    /// Issues a fresh access code, stores it, and dispatches it by email.
    ///
    /// Re-entrant: every request regenerates the code and re-enters
    /// `PENDING_SETUP`, superseding any previously issued code.
    pub async fn request_code(&self, email: &str) -> Result<(), SetupError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SetupError::MissingFields("Email required"));
        }
        let account = self
            .find_account(email)
            .await?
            .ok_or(SetupError::UserNotFound)?;

        let code = generate_access_code();
        self.directory
            .store_access_code(&account.user_id, &code)
            .await
            .map_err(map_directory_error)?;
        tracing::debug!(user_id = %account.user_id, code, "access code stored");

        self.mailer
            .send_access_code(&account.email, &code)
            .await
            .map_err(SetupError::DispatchFailure)?;
        tracing::info!(user_id = %account.user_id, "access code dispatched");
        Ok(())
    }

    /// Pure capability check for the invite redemption page.
    ///
    /// The signature/expiry check is stateless; on top of it, a capability
    /// whose setup already completed is refused unless policy allows
    /// re-submission, so a consumed invitation cannot be probed back open.
    pub async fn verify_invite(&self, token: &str) -> Result<InvitePayload, SetupError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SetupError::MissingFields("Token required"));
        }
        let payload = self.tokens.verify(token).map_err(|error| {
            tracing::debug!(reason = error.reason(), "invite token rejected");
            SetupError::InvalidOrExpiredCapability
        })?;
        if !self.policy.allow_token_resubmission {
            if let Some(account) = self.find_account(&payload.email).await? {
                if account.setup_completed() {
                    tracing::debug!(user_id = %account.user_id, "invite already consumed");
                    return Err(SetupError::InvalidOrExpiredCapability);
                }
            }
        }
        Ok(payload)
    }

    /// Code path: activates the account when the trimmed codes match.
    pub async fn complete_with_code(
        &self,
        email: &str,
        code: &str,
        password: &str,
    ) -> Result<(), SetupError> {
        let email = email.trim();
        let code = code.trim();
        if email.is_empty() || code.is_empty() || password.is_empty() {
            return Err(SetupError::MissingFields("Missing required fields"));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(SetupError::PasswordTooShort);
        }

        let account = self
            .find_account(email)
            .await?
            .ok_or(SetupError::UserNotFound)?;

        let stored = account.access_code.as_deref().map(str::trim);
        if !account.is_pending_setup() || stored != Some(code) {
            // Wrong code and wrong state are deliberately indistinguishable;
            // the comparison values stay in the server log.
            tracing::debug!(
                user_id = %account.user_id,
                setup_required = account.setup_required,
                stored_code = stored.unwrap_or(""),
                received_code = code,
                "access code rejected"
            );
            return Err(SetupError::InvalidAccessCode);
        }

        let commit = SetupCommit {
            password_sha256: hash_password(&account.user_id, password),
            expected_access_code: Some(code.to_string()),
            completed_unix_ms: current_unix_timestamp_ms(),
        };
        self.directory
            .commit_setup(&account.user_id, &commit)
            .await
            .map_err(|error| match error {
                // The stored code changed between read and commit; surface it
                // like any other mismatch.
                DirectoryError::CodeConflict => {
                    tracing::debug!(user_id = %account.user_id, "access code changed during commit");
                    SetupError::InvalidAccessCode
                }
                other => map_directory_error(other),
            })?;
        tracing::info!(user_id = %account.user_id, "setup completed via access code");
        Ok(())
    }

    /// Token path: activates the account named by a verified capability.
    pub async fn complete_with_token(
        &self,
        token: &str,
        password: &str,
    ) -> Result<(), SetupError> {
        let token = token.trim();
        if token.is_empty() || password.is_empty() {
            return Err(SetupError::MissingFields("Missing required fields"));
        }
        let payload = self.tokens.verify(token).map_err(|error| {
            tracing::debug!(reason = error.reason(), "invite token rejected");
            SetupError::InvalidOrExpiredCapability
        })?;
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(SetupError::PasswordTooShort);
        }

        // This endpoint's contract has no not-found case: an account that is
        // missing or does not match the claims reads as a bad capability.
        let Some(account) = self.find_account(&payload.email).await? else {
            return Err(SetupError::InvalidOrExpiredCapability);
        };
        if account.user_id != payload.user_id {
            tracing::debug!(user_id = %account.user_id, "invite claims do not match account");
            return Err(SetupError::InvalidOrExpiredCapability);
        }
        if account.setup_completed() && !self.policy.allow_token_resubmission {
            tracing::debug!(user_id = %account.user_id, "invite already consumed");
            return Err(SetupError::InvalidOrExpiredCapability);
        }

        let commit = SetupCommit {
            password_sha256: hash_password(&account.user_id, password),
            expected_access_code: None,
            completed_unix_ms: current_unix_timestamp_ms(),
        };
        self.directory
            .commit_setup(&account.user_id, &commit)
            .await
            .map_err(map_directory_error)?;
        tracing::info!(user_id = %account.user_id, "setup completed via invitation token");
        Ok(())
    }

    async fn find_account(&self, email: &str) -> Result<Option<AccountRecord>, SetupError> {
        self.directory
            .find_by_email(email)
            .await
            .map_err(map_directory_error)
    }
}

fn map_directory_error(error: DirectoryError) -> SetupError {
    match error {
        DirectoryError::UserNotFound => SetupError::UserNotFound,
        other => SetupError::UpstreamUpdateFailure(other),
    }
}

fn hash_password(user_id: &str, password: &str) -> String {
    format!("{:x}", Sha256::digest(format!("{user_id}:{password}")))
}

#[cfg(test)]
mod tests {
    use super::{LookupStatus, OnboardingPolicy, OnboardingService, SetupError};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use vouch_capability::{InviteTokenAuthority, InviteTokenConfig};
    use vouch_directory::{AccountDirectory, FileAccountDirectory};
    use vouch_mailer::{AccessCodeMailer, MailerError};

    const TEST_NOW_MS: u64 = 1_750_000_000_000;
    const TEST_SECRET: &str = "test-capability-secret";

    #[derive(Clone, Default)]
    struct RecordingMailer {
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl RecordingMailer {
        fn last_code(&self) -> String {
            self.sent
                .lock()
                .expect("mailer lock")
                .last()
                .expect("at least one dispatch")
                .1
                .clone()
        }
    }

    #[async_trait]
    impl AccessCodeMailer for RecordingMailer {
        async fn send_access_code(&self, to: &str, code: &str) -> Result<(), MailerError> {
            self.sent
                .lock()
                .expect("mailer lock")
                .push((to.to_string(), code.to_string()));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FailingMailer;

    #[async_trait]
    impl AccessCodeMailer for FailingMailer {
        async fn send_access_code(&self, _to: &str, _code: &str) -> Result<(), MailerError> {
            Err(MailerError::SendFailed("relay refused".to_string()))
        }
    }

    struct Fixture {
        directory: Arc<FileAccountDirectory>,
        mailer: RecordingMailer,
        service: OnboardingService,
        _temp: tempfile::TempDir,
    }

    fn fixture_with_policy(policy: OnboardingPolicy) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let directory =
            Arc::new(FileAccountDirectory::open(temp.path().join("accounts.json")).expect("open"));
        let mailer = RecordingMailer::default();
        let service = OnboardingService::new(
            Arc::clone(&directory) as Arc<dyn AccountDirectory>,
            Arc::new(mailer.clone()),
            InviteTokenAuthority::new(InviteTokenConfig::new(TEST_SECRET)).expect("authority"),
            policy,
        );
        Fixture {
            directory,
            mailer,
            service,
            _temp: temp,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_policy(OnboardingPolicy::default())
    }

    fn authority() -> InviteTokenAuthority {
        InviteTokenAuthority::new(InviteTokenConfig::new(TEST_SECRET)).expect("authority")
    }

    #[tokio::test]
    async fn functional_lookup_reports_unknown_pending_and_active() {
        let fixture = fixture();
        assert_eq!(
            fixture.service.lookup("ghost@x.com").await.expect("lookup"),
            LookupStatus::Unknown
        );

        fixture
            .directory
            .create_account("alice@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        assert_eq!(
            fixture.service.lookup("ALICE@x.com").await.expect("lookup"),
            LookupStatus::SetupRequired {
                email: "alice@x.com".to_string()
            }
        );

        fixture
            .service
            .request_code("alice@x.com")
            .await
            .expect("request code");
        let code = fixture.mailer.last_code();
        fixture
            .service
            .complete_with_code("alice@x.com", &code, "secret1")
            .await
            .expect("complete");
        assert_eq!(
            fixture.service.lookup("alice@x.com").await.expect("lookup"),
            LookupStatus::Active {
                email: "alice@x.com".to_string()
            }
        );
    }

    #[tokio::test]
    async fn functional_request_code_stores_six_digit_code_and_dispatches_it() {
        let fixture = fixture();
        fixture
            .directory
            .create_account("alice@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        fixture
            .service
            .request_code("alice@x.com")
            .await
            .expect("request code");

        let record = fixture
            .directory
            .find_by_email("alice@x.com")
            .await
            .expect("find")
            .expect("present");
        assert!(record.setup_required);
        let stored = record.access_code.expect("code stored");
        let value = stored.parse::<u32>().expect("numeric");
        assert!((100_000..=999_999).contains(&value));
        assert_eq!(fixture.mailer.last_code(), stored);
    }

    #[tokio::test]
    async fn integration_code_path_end_to_end_activates_account() {
        let fixture = fixture();
        fixture
            .directory
            .create_account("alice@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        fixture
            .service
            .request_code("alice@x.com")
            .await
            .expect("request code");
        let code = fixture.mailer.last_code();

        fixture
            .service
            .complete_with_code("alice@x.com", &code, "secret1")
            .await
            .expect("complete");

        let record = fixture
            .directory
            .find_by_email("alice@x.com")
            .await
            .expect("find")
            .expect("present");
        assert!(!record.setup_required);
        assert_eq!(record.access_code, None);
        assert!(record.email_confirmed);
        assert!(record.password_sha256.is_some());
        assert!(record.setup_completed_unix_ms.is_some());

        // The account left PENDING_SETUP, so a second identical attempt fails.
        let error = fixture
            .service
            .complete_with_code("alice@x.com", &code, "secret1")
            .await
            .expect_err("second completion must fail");
        assert!(matches!(error, SetupError::InvalidAccessCode));
    }

    #[tokio::test]
    async fn unit_code_comparison_trims_but_stays_exact() {
        let fixture = fixture();
        let account = fixture
            .directory
            .create_account("alice@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        fixture
            .directory
            .store_access_code(&account.user_id, "482913")
            .await
            .expect("store code");

        let error = fixture
            .service
            .complete_with_code("alice@x.com", "482914", "secret1")
            .await
            .expect_err("near-miss code must fail");
        assert!(matches!(error, SetupError::InvalidAccessCode));

        fixture
            .service
            .complete_with_code("alice@x.com", " 482913 ", "secret1")
            .await
            .expect("padded code must match after trimming");
    }

    #[tokio::test]
    async fn unit_password_length_boundary_is_six_characters() {
        let fixture = fixture();
        let account = fixture
            .directory
            .create_account("alice@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        fixture
            .directory
            .store_access_code(&account.user_id, "482913")
            .await
            .expect("store code");

        let error = fixture
            .service
            .complete_with_code("alice@x.com", "482913", "five5")
            .await
            .expect_err("five characters must fail");
        assert!(matches!(error, SetupError::PasswordTooShort));

        fixture
            .service
            .complete_with_code("alice@x.com", "482913", "sixsix")
            .await
            .expect("six characters must pass");
    }

    #[tokio::test]
    async fn unit_missing_fields_are_rejected_up_front() {
        let fixture = fixture();
        assert!(matches!(
            fixture.service.lookup("  ").await,
            Err(SetupError::MissingFields(_))
        ));
        assert!(matches!(
            fixture.service.request_code("").await,
            Err(SetupError::MissingFields(_))
        ));
        assert!(matches!(
            fixture.service.complete_with_code("a@x.com", "", "secret1").await,
            Err(SetupError::MissingFields(_))
        ));
        assert!(matches!(
            fixture.service.complete_with_token("", "secret1").await,
            Err(SetupError::MissingFields(_))
        ));
        assert!(matches!(
            fixture.service.verify_invite("   ").await,
            Err(SetupError::MissingFields(_))
        ));
    }

    #[tokio::test]
    async fn unit_request_code_for_unknown_user_reports_not_found() {
        let fixture = fixture();
        assert!(matches!(
            fixture.service.request_code("ghost@x.com").await,
            Err(SetupError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn integration_token_path_end_to_end_activates_account() {
        let fixture = fixture();
        let account = fixture
            .directory
            .create_account("bob@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        let token = authority()
            .issue(&account.user_id, "bob@x.com")
            .expect("issue");

        let payload = fixture.service.verify_invite(&token).await.expect("verify");
        assert_eq!(payload.email, "bob@x.com");

        fixture
            .service
            .complete_with_token(&token, "secret1")
            .await
            .expect("complete");
        let record = fixture
            .directory
            .find_by_email("bob@x.com")
            .await
            .expect("find")
            .expect("present");
        assert!(!record.setup_required);
        assert!(record.email_confirmed);
        assert!(record.setup_completed_unix_ms.is_some());
    }

    #[tokio::test]
    async fn regression_consumed_token_is_rejected_unless_policy_allows_resubmission() {
        let fixture = fixture();
        let account = fixture
            .directory
            .create_account("bob@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        let token = authority()
            .issue(&account.user_id, "bob@x.com")
            .expect("issue");
        fixture
            .service
            .complete_with_token(&token, "secret1")
            .await
            .expect("first completion");

        assert!(matches!(
            fixture.service.complete_with_token(&token, "secret2").await,
            Err(SetupError::InvalidOrExpiredCapability)
        ));
        assert!(matches!(
            fixture.service.verify_invite(&token).await,
            Err(SetupError::InvalidOrExpiredCapability)
        ));

        let permissive = fixture_with_policy(OnboardingPolicy {
            allow_token_resubmission: true,
        });
        let account = permissive
            .directory
            .create_account("bob@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        let token = authority()
            .issue(&account.user_id, "bob@x.com")
            .expect("issue");
        permissive
            .service
            .complete_with_token(&token, "secret1")
            .await
            .expect("first completion");
        permissive
            .service
            .complete_with_token(&token, "secret2")
            .await
            .expect("permissive policy accepts re-submission");
    }

    #[tokio::test]
    async fn regression_token_with_mismatched_account_reads_as_invalid_capability() {
        let fixture = fixture();
        fixture
            .directory
            .create_account("bob@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        // Claims carry a user id that does not match the stored account.
        let token = authority().issue("usr_spoofed", "bob@x.com").expect("issue");
        assert!(matches!(
            fixture.service.complete_with_token(&token, "secret1").await,
            Err(SetupError::InvalidOrExpiredCapability)
        ));

        // Same outcome when no account exists at all.
        let token = authority().issue("usr_01", "ghost@x.com").expect("issue");
        assert!(matches!(
            fixture.service.complete_with_token(&token, "secret1").await,
            Err(SetupError::InvalidOrExpiredCapability)
        ));
    }

    #[tokio::test]
    async fn regression_code_failure_message_carries_no_comparison_values() {
        let fixture = fixture();
        let account = fixture
            .directory
            .create_account("alice@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        fixture
            .directory
            .store_access_code(&account.user_id, "482913")
            .await
            .expect("store code");

        let error = fixture
            .service
            .complete_with_code("alice@x.com", "111222", "secret1")
            .await
            .expect_err("mismatch must fail");
        let rendered = error.to_string();
        assert_eq!(rendered, "Invalid access code");
        assert!(!rendered.contains("482913"));
        assert!(!rendered.contains("111222"));
    }

    #[tokio::test]
    async fn regression_wrong_state_is_indistinguishable_from_wrong_code() {
        let fixture = fixture();
        fixture
            .directory
            .create_account("alice@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        fixture
            .service
            .request_code("alice@x.com")
            .await
            .expect("request code");
        let code = fixture.mailer.last_code();
        fixture
            .service
            .complete_with_code("alice@x.com", &code, "secret1")
            .await
            .expect("complete");

        // Account is now active; replaying the once-valid code must produce
        // the same error as a plain mismatch.
        let error = fixture
            .service
            .complete_with_code("alice@x.com", &code, "secret1")
            .await
            .expect_err("active account must refuse the code path");
        assert!(matches!(error, SetupError::InvalidAccessCode));
        assert_eq!(error.to_string(), "Invalid access code");
    }

    #[tokio::test]
    async fn regression_dispatch_failure_surfaces_after_code_is_stored() {
        let temp = tempdir().expect("tempdir");
        let directory =
            Arc::new(FileAccountDirectory::open(temp.path().join("accounts.json")).expect("open"));
        let service = OnboardingService::new(
            Arc::clone(&directory) as Arc<dyn AccountDirectory>,
            Arc::new(FailingMailer),
            authority(),
            OnboardingPolicy::default(),
        );
        directory
            .create_account("alice@x.com", TEST_NOW_MS)
            .await
            .expect("create");

        let error = service
            .request_code("alice@x.com")
            .await
            .expect_err("mailer failure must surface");
        assert!(matches!(error, SetupError::DispatchFailure(_)));

        // The code was already committed before dispatch, matching the
        // store-then-send ordering of the flow.
        let record = directory
            .find_by_email("alice@x.com")
            .await
            .expect("find")
            .expect("present");
        assert!(record.access_code.is_some());
    }

    #[tokio::test]
    async fn functional_repeated_code_requests_supersede_the_previous_code() {
        let fixture = fixture();
        fixture
            .directory
            .create_account("alice@x.com", TEST_NOW_MS)
            .await
            .expect("create");
        fixture
            .service
            .request_code("alice@x.com")
            .await
            .expect("first request");
        let first = fixture.mailer.last_code();
        fixture
            .service
            .request_code("alice@x.com")
            .await
            .expect("second request");
        let second = fixture.mailer.last_code();

        let record = fixture
            .directory
            .find_by_email("alice@x.com")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(record.access_code.as_deref(), Some(second.as_str()));
        assert!(record.setup_required);
        if first != second {
            let error = fixture
                .service
                .complete_with_code("alice@x.com", &first, "secret1")
                .await
                .expect_err("superseded code must fail");
            assert!(matches!(error, SetupError::InvalidAccessCode));
        }
    }
}
