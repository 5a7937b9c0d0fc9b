//! Object storage access for workspace files.
//!
//! [`ObjectStore`] is the substitution point between the worker and the
//! S3-compatible backend. The production implementation targets Cloudflare
//! R2 through opendal's S3 service; buckets travel in task payloads, so
//! operators are built per bucket and cached.

use async_trait::async_trait;
use color_eyre::eyre::Report;
use dashmap::DashMap;
use opendal::{Operator, services};
use secrecy::ExposeSecret as _;

use crate::config::R2Credentials;
use crate::error::{StorageError, StorageResult};

/// Read access to an S3-compatible object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches one object in full.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;
}

/// R2-backed [`ObjectStore`] with one cached operator per bucket.
pub struct R2Store {
    credentials: R2Credentials,
    operators: DashMap<String, Operator>,
}

impl R2Store {
    /// Creates a store for the given account credentials.
    #[must_use]
    pub fn new(credentials: R2Credentials) -> Self {
        Self {
            credentials,
            operators: DashMap::new(),
        }
    }

    fn operator(&self, bucket: &str) -> StorageResult<Operator> {
        if let Some(operator) = self.operators.get(bucket) {
            return Ok(operator.clone());
        }

        let builder = services::S3::default()
            .bucket(bucket)
            .endpoint(&self.credentials.endpoint_url())
            .region("auto")
            .access_key_id(&self.credentials.access_key_id)
            .secret_access_key(self.credentials.secret_access_key.expose_secret());
        let operator = Operator::new(builder)
            .map_err(|err| StorageError::Configuration {
                bucket: bucket.to_owned(),
                source: Report::new(err),
            })?
            .finish();
        self.operators.insert(bucket.to_owned(), operator.clone());
        Ok(operator)
    }
}

#[async_trait]
impl ObjectStore for R2Store {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let operator = self.operator(bucket)?;
        let buffer = operator
            .read(key)
            .await
            .map_err(|err| StorageError::Fetch {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                source: Report::new(err),
            })?;
        Ok(buffer.to_vec())
    }
}
