//! Account setup records and the credential-store seam.
//!
//! The directory is the single source of truth for whether an account still
//! requires initial setup. In production deployments this seam fronts an
//! external identity provider; [`FileAccountDirectory`] is the bundled
//! JSON-file implementation used by the gateway and the operator CLI.

mod file_store;
mod records;

pub use file_store::FileAccountDirectory;
pub use records::{AccountDirectory, AccountRecord, DirectoryError, SetupCommit};
