//! Environment-driven configuration for the worker service.
//!
//! All values are read from `WORKER_*` environment variables via
//! [`OrthoConfig`](https://github.com/leynos/ortho-config). Every optional
//! field has a documented default; credentials are surfaced as
//! [`SecretString`] by the accessors so they never land in logs.

use color_eyre::eyre::eyre;
use ortho_config::OrthoConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Default collection (table) holding job documents.
pub const DEFAULT_JOBS_COLLECTION: &str = "jobs";
/// Default wall-clock timeout for direct snippet execution.
pub const DEFAULT_DIRECT_TIMEOUT_SECS: u64 = 10;
/// Default wall-clock timeout for workspace execution.
pub const DEFAULT_WORKSPACE_TIMEOUT_SECS: u64 = 30;
/// Extra budget on top of the execution timeout for materialisation and
/// metadata writes before the whole task is abandoned.
pub const TASK_DEADLINE_MARGIN_SECS: u64 = 30;
/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/text-embedding-004";
/// Default embedding dimension for [`DEFAULT_EMBEDDING_MODEL`].
pub const DEFAULT_EMBEDDING_DIM: usize = 768;
/// Default generation model used for hypothetical snippets and planning.
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-pro";
/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Service configuration loaded from `WORKER_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, OrthoConfig, Default)]
#[ortho_config(prefix = "WORKER")]
pub struct WorkerCfg {
    /// Cloud project the metadata store belongs to (informational).
    pub project_id: Option<String>,
    /// Collection (table) name for job documents; default `jobs`.
    pub jobs_collection: Option<String>,
    /// Connection string for the metadata/vector database.
    pub database_url: Option<String>,
    /// Wall-clock timeout for direct snippet execution, seconds; default 10.
    pub execution_timeout_secs: Option<u64>,
    /// Wall-clock timeout for workspace execution, seconds; default 30.
    pub workspace_timeout_secs: Option<u64>,
    /// Whole-task deadline, seconds; default execution timeout plus margin.
    pub task_deadline_secs: Option<u64>,
    /// Sandbox CPU-time cap, seconds; default 5.
    pub cpu_time_limit_secs: Option<u64>,
    /// Sandbox address-space cap, mebibytes; default 256.
    pub memory_limit_mib: Option<u64>,
    /// Sandbox process cap; default 1.
    pub max_processes: Option<u64>,
    /// Sandbox file-size cap, mebibytes; default 10.
    pub max_file_size_mib: Option<u64>,
    /// R2 account identifier (forms the S3-compatible endpoint).
    pub r2_account_id: Option<String>,
    /// R2 access key id.
    pub r2_access_key_id: Option<String>,
    /// R2 secret access key.
    pub r2_secret_access_key: Option<String>,
    /// Bucket used by the indexing worker (execution payloads carry theirs).
    pub r2_bucket_name: Option<String>,
    /// Embedding model name; default `models/text-embedding-004`.
    pub embedding_model: Option<String>,
    /// Embedding dimension; default 768.
    pub embedding_dim: Option<usize>,
    /// Generation model for hypothetical snippets and planning.
    pub generation_model: Option<String>,
    /// Google API key for embedding and generation calls.
    pub google_api_key: Option<String>,
    /// Cohere API key for reranking.
    pub cohere_api_key: Option<String>,
    /// Log filter, e.g. `info` or `code_exec::worker=debug`; default `info`.
    pub log_level: Option<String>,
    /// Listen port; default 8080.
    pub port: Option<u16>,
}

impl WorkerCfg {
    /// Collection name for job documents.
    #[must_use]
    pub fn jobs_collection(&self) -> &str {
        self.jobs_collection.as_deref().unwrap_or(DEFAULT_JOBS_COLLECTION)
    }

    /// Wall-clock timeout for direct snippet execution.
    #[must_use]
    pub fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs.unwrap_or(DEFAULT_DIRECT_TIMEOUT_SECS))
    }

    /// Wall-clock timeout for workspace execution.
    #[must_use]
    pub fn workspace_timeout(&self) -> Duration {
        Duration::from_secs(self.workspace_timeout_secs.unwrap_or(DEFAULT_WORKSPACE_TIMEOUT_SECS))
    }

    /// Whole-task deadline covering materialisation, execution, and metadata
    /// writes. Always at least the workspace timeout plus the margin so the
    /// child deadline fires first.
    #[must_use]
    pub fn task_deadline(&self) -> Duration {
        let floor = self
            .workspace_timeout()
            .max(self.direct_timeout())
            .saturating_add(Duration::from_secs(TASK_DEADLINE_MARGIN_SECS));
        self.task_deadline_secs
            .map(Duration::from_secs)
            .map_or(floor, |configured| configured.max(floor))
    }

    /// Kernel limits installed in the sandbox child.
    #[must_use]
    pub fn resource_limits(&self) -> crate::sandbox::ResourceLimits {
        let defaults = crate::sandbox::ResourceLimits::default();
        crate::sandbox::ResourceLimits {
            cpu_time_secs: self.cpu_time_limit_secs.unwrap_or(defaults.cpu_time_secs),
            address_space_mib: self.memory_limit_mib.unwrap_or(defaults.address_space_mib),
            max_processes: self.max_processes.unwrap_or(defaults.max_processes),
            max_file_size_mib: self
                .max_file_size_mib
                .unwrap_or(defaults.max_file_size_mib),
        }
    }

    /// Embedding model name.
    #[must_use]
    pub fn embedding_model(&self) -> &str {
        self.embedding_model.as_deref().unwrap_or(DEFAULT_EMBEDDING_MODEL)
    }

    /// Embedding dimension.
    #[must_use]
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim.unwrap_or(DEFAULT_EMBEDDING_DIM)
    }

    /// Generation model name.
    #[must_use]
    pub fn generation_model(&self) -> &str {
        self.generation_model.as_deref().unwrap_or(DEFAULT_GENERATION_MODEL)
    }

    /// Log filter directive.
    #[must_use]
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Listen port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Database connection string; required at startup.
    pub fn require_database_url(&self) -> ConfigResult<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::from(eyre!("WORKER_DATABASE_URL must be set")))
    }

    /// Bucket for the indexing worker; required at startup.
    pub fn require_index_bucket(&self) -> ConfigResult<&str> {
        self.r2_bucket_name
            .as_deref()
            .ok_or_else(|| ConfigError::from(eyre!("WORKER_R2_BUCKET_NAME must be set")))
    }

    /// Object-store credentials; all three parts are required at startup.
    pub fn require_r2_credentials(&self) -> ConfigResult<R2Credentials> {
        let account_id = self
            .r2_account_id
            .clone()
            .ok_or_else(|| ConfigError::from(eyre!("WORKER_R2_ACCOUNT_ID must be set")))?;
        let access_key_id = self
            .r2_access_key_id
            .clone()
            .ok_or_else(|| ConfigError::from(eyre!("WORKER_R2_ACCESS_KEY_ID must be set")))?;
        let secret_access_key = self
            .r2_secret_access_key
            .clone()
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::from(eyre!("WORKER_R2_SECRET_ACCESS_KEY must be set")))?;
        Ok(R2Credentials {
            account_id,
            access_key_id,
            secret_access_key,
        })
    }

    /// Google API key; required at startup.
    pub fn require_google_api_key(&self) -> ConfigResult<SecretString> {
        self.google_api_key
            .clone()
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::from(eyre!("WORKER_GOOGLE_API_KEY must be set")))
    }

    /// Cohere API key; required at startup.
    pub fn require_cohere_api_key(&self) -> ConfigResult<SecretString> {
        self.cohere_api_key
            .clone()
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::from(eyre!("WORKER_COHERE_API_KEY must be set")))
    }
}

/// Credentials and endpoint material for the R2 object store.
#[derive(Debug, Clone)]
pub struct R2Credentials {
    /// Account identifier; the endpoint is
    /// `https://<account_id>.r2.cloudflarestorage.com`.
    pub account_id: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: SecretString,
}

impl R2Credentials {
    /// S3-compatible endpoint URL for this account.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_optional_field() {
        let cfg = WorkerCfg::default();
        assert_eq!(cfg.jobs_collection(), "jobs");
        assert_eq!(cfg.direct_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.workspace_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.embedding_model(), "models/text-embedding-004");
        assert_eq!(cfg.embedding_dim(), 768);
        assert_eq!(cfg.port(), 8080);
        assert_eq!(cfg.log_level(), "info");
    }

    #[test]
    fn task_deadline_never_undercuts_the_child_deadline() {
        let cfg = WorkerCfg {
            task_deadline_secs: Some(1),
            ..WorkerCfg::default()
        };
        assert_eq!(cfg.task_deadline(), Duration::from_secs(60));
    }

    #[test]
    fn task_deadline_defaults_to_timeout_plus_margin() {
        let cfg = WorkerCfg {
            workspace_timeout_secs: Some(45),
            ..WorkerCfg::default()
        };
        assert_eq!(cfg.task_deadline(), Duration::from_secs(75));
    }

    #[test]
    fn sandbox_limits_are_overridable_per_field() {
        let cfg = WorkerCfg {
            memory_limit_mib: Some(512),
            ..WorkerCfg::default()
        };
        let limits = cfg.resource_limits();
        assert_eq!(limits.address_space_mib, 512);
        assert_eq!(limits.cpu_time_secs, 5);
        assert_eq!(limits.max_processes, 1);
        assert_eq!(limits.max_file_size_mib, 10);
    }

    #[test]
    fn missing_required_values_are_reported_by_name() {
        let cfg = WorkerCfg::default();
        let err = match cfg.require_database_url() {
            Ok(_) => String::new(),
            Err(err) => format!("{err}"),
        };
        assert!(err.contains("WORKER_DATABASE_URL"));
    }

    #[test]
    fn r2_endpoint_is_derived_from_the_account_id() {
        let creds = R2Credentials {
            account_id: "acct".into(),
            access_key_id: "key".into(),
            secret_access_key: SecretString::from("secret".to_owned()),
        };
        assert_eq!(creds.endpoint_url(), "https://acct.r2.cloudflarestorage.com");
    }
}
