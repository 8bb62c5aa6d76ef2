//! Environment variables and per-user directories.

use std::env::{self, VarError};
use std::path::PathBuf;

use super::RealRuntime;

/// Blank values count as unset, so `RULESETS_STORAGE_ROOT=` in a shell
/// profile does not point downloads at the working directory.
fn non_blank(value: Result<String, VarError>) -> Result<String, VarError> {
    match value {
        Ok(value) if value.trim().is_empty() => Err(VarError::NotPresent),
        other => other,
    }
}

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn env_var_impl(&self, key: &str) -> Result<String, VarError> {
        non_blank(env::var(key))
    }

    pub(crate) fn home_dir_impl(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }

    /// Roaming data directory first, then the local one for platforms that
    /// only provide that.
    pub(crate) fn data_dir_impl(&self) -> Option<PathBuf> {
        dirs::data_dir().or_else(dirs::data_local_dir)
    }
}
