use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vouch_core::write_json_atomic;

use crate::records::{AccountDirectory, AccountRecord, DirectoryError, SetupCommit};

const DIRECTORY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DirectoryFile {
    schema_version: u32,
    #[serde(default)]
    accounts: Vec<AccountRecord>,
}

impl Default for DirectoryFile {
    fn default() -> Self {
        Self {
            schema_version: DIRECTORY_SCHEMA_VERSION,
            accounts: Vec::new(),
        }
    }
}

/// JSON-file-backed [`AccountDirectory`].
///
/// All mutations happen under one lock and land on disk through an atomic
/// temp-file + rename write, so concurrent setup attempts observe a
/// consistent snapshot and readers never see partial state.
#[derive(Debug)]
pub struct FileAccountDirectory {
    path: PathBuf,
    state: Mutex<DirectoryFile>,
}

impl FileAccountDirectory {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DirectoryError> {
        let path = path.into();
        let state = load_directory_file(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_state<T>(
        &self,
        apply: impl FnOnce(&mut DirectoryFile) -> Result<T, DirectoryError>,
    ) -> Result<T, DirectoryError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DirectoryError::Storage(anyhow!("directory state lock poisoned")))?;
        apply(&mut state)
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut DirectoryFile) -> Result<T, DirectoryError>,
    ) -> Result<T, DirectoryError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DirectoryError::Storage(anyhow!("directory state lock poisoned")))?;
        let value = apply(&mut state)?;
        write_json_atomic(&self.path, &*state)?;
        Ok(value)
    }
}

fn load_directory_file(path: &Path) -> Result<DirectoryFile, DirectoryError> {
    if !path.exists() {
        return Ok(DirectoryFile::default());
    }
    let raw = std::fs::read_to_string(path)?;
    let parsed = serde_json::from_str::<DirectoryFile>(&raw)?;
    if parsed.schema_version != DIRECTORY_SCHEMA_VERSION {
        return Err(DirectoryError::UnsupportedSchema {
            found: parsed.schema_version,
            expected: DIRECTORY_SCHEMA_VERSION,
        });
    }
    Ok(parsed)
}

fn new_user_id() -> String {
    format!("usr_{:016x}", rand::random::<u64>())
}

fn account_index_by_user_id(state: &DirectoryFile, user_id: &str) -> Option<usize> {
    state
        .accounts
        .iter()
        .position(|account| account.user_id == user_id)
}

fn account_index_by_email(state: &DirectoryFile, email: &str) -> Option<usize> {
    let email = email.trim();
    state
        .accounts
        .iter()
        .position(|account| account.email.eq_ignore_ascii_case(email))
}

#[async_trait]
impl AccountDirectory for FileAccountDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>, DirectoryError> {
        self.with_state(|state| {
            Ok(account_index_by_email(state, email).map(|index| state.accounts[index].clone()))
        })
    }

    async fn create_account(
        &self,
        email: &str,
        now_unix_ms: u64,
    ) -> Result<AccountRecord, DirectoryError> {
        let email = email.trim();
        self.mutate(|state| {
            if account_index_by_email(state, email).is_some() {
                return Err(DirectoryError::AlreadyExists);
            }
            let account = AccountRecord {
                user_id: new_user_id(),
                email: email.to_string(),
                email_confirmed: false,
                password_sha256: None,
                setup_required: true,
                access_code: None,
                setup_completed_unix_ms: None,
                created_unix_ms: now_unix_ms,
            };
            state.accounts.push(account.clone());
            tracing::debug!(user_id = %account.user_id, "provisioned pending account");
            Ok(account)
        })
    }

    async fn store_access_code(&self, user_id: &str, code: &str) -> Result<(), DirectoryError> {
        self.mutate(|state| {
            let index =
                account_index_by_user_id(state, user_id).ok_or(DirectoryError::UserNotFound)?;
            let account = &mut state.accounts[index];
            account.setup_required = true;
            account.access_code = Some(code.trim().to_string());
            Ok(())
        })
    }

    async fn commit_setup(
        &self,
        user_id: &str,
        commit: &SetupCommit,
    ) -> Result<(), DirectoryError> {
        self.mutate(|state| {
            let index =
                account_index_by_user_id(state, user_id).ok_or(DirectoryError::UserNotFound)?;
            let account = &mut state.accounts[index];
            if let Some(expected) = commit.expected_access_code.as_deref() {
                let stored = account.access_code.as_deref().map(str::trim);
                if stored != Some(expected.trim()) {
                    return Err(DirectoryError::CodeConflict);
                }
            }
            account.password_sha256 = Some(commit.password_sha256.clone());
            account.email_confirmed = true;
            account.setup_required = false;
            account.access_code = None;
            account.setup_completed_unix_ms = Some(commit.completed_unix_ms);
            Ok(())
        })
    }

    async fn reset_setup(&self, user_id: &str) -> Result<(), DirectoryError> {
        self.mutate(|state| {
            let index =
                account_index_by_user_id(state, user_id).ok_or(DirectoryError::UserNotFound)?;
            let account = &mut state.accounts[index];
            account.setup_required = true;
            account.access_code = None;
            account.setup_completed_unix_ms = None;
            Ok(())
        })
    }
}
