use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One account's setup record.
///
/// `access_code` is populated only while `setup_required` is true; a
/// completed setup clears the code, confirms the email, and stamps
/// `setup_completed_unix_ms` in the same commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountRecord {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub email_confirmed: bool,
    #[serde(default)]
    pub password_sha256: Option<String>,
    #[serde(default)]
    pub setup_required: bool,
    #[serde(default)]
    pub access_code: Option<String>,
    #[serde(default)]
    pub setup_completed_unix_ms: Option<u64>,
    pub created_unix_ms: u64,
}

impl AccountRecord {
    pub fn is_pending_setup(&self) -> bool {
        self.setup_required
    }

    pub fn setup_completed(&self) -> bool {
        self.setup_completed_unix_ms.is_some()
    }
}

/// The single atomic write that activates an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCommit {
    pub password_sha256: String,
    /// When set, the commit fails with [`DirectoryError::CodeConflict`]
    /// unless the stored code still equals this value (trim-compared).
    pub expected_access_code: Option<String>,
    pub completed_unix_ms: u64,
}

#[derive(Debug, Error)]
/// Enumerates supported `DirectoryError` values.
pub enum DirectoryError {
    #[error("account not found")]
    UserNotFound,
    #[error("an account already exists for this email")]
    AlreadyExists,
    #[error("stored access code changed during commit")]
    CodeConflict,
    #[error("unsupported directory schema_version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },
    #[error("directory io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("directory state codec failure: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("directory storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Seam over the credential/identity store holding account setup records.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Case-insensitive email lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>, DirectoryError>;

    /// Provisions a fresh account in the pending-setup state.
    async fn create_account(
        &self,
        email: &str,
        now_unix_ms: u64,
    ) -> Result<AccountRecord, DirectoryError>;

    /// Stores a freshly issued access code and re-enters the pending state.
    async fn store_access_code(&self, user_id: &str, code: &str) -> Result<(), DirectoryError>;

    /// Applies the activation commit: password digest, email confirmation,
    /// flag flip, code clear and completion stamp in one write.
    async fn commit_setup(&self, user_id: &str, commit: &SetupCommit)
        -> Result<(), DirectoryError>;

    /// Operator reset: back to pending setup with no stale code or stamp.
    async fn reset_setup(&self, user_id: &str) -> Result<(), DirectoryError>;
}
