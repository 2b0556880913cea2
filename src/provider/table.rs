//! Table readiness client.
//!
//! A stack update returning is not enough to proceed: a newly added index
//! backfills in the background and the table only counts as settled once
//! every index reports active. This module exposes that readiness signal.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::IndexStatus;
use aws_sdk_dynamodb::Client;
use tracing::debug;

use crate::error::{ProviderError, Result};

/// Readiness of a single secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReadiness {
    /// Index name.
    pub index_name: String,
    /// Whether the index is active and fully backfilled.
    pub ready: bool,
}

impl IndexReadiness {
    /// Returns true when every index in the slice is ready.
    #[must_use]
    pub fn all_ready(statuses: &[Self]) -> bool {
        statuses.iter().all(|s| s.ready)
    }
}

/// Trait for querying table index readiness.
#[async_trait]
pub trait TableClient: Send + Sync {
    /// Returns the readiness of every secondary index on a table.
    ///
    /// A table without secondary indexes yields an empty list, which counts
    /// as ready.
    async fn index_statuses(&self, table: &str) -> Result<Vec<IndexReadiness>>;
}

/// DynamoDB-backed table client.
#[derive(Debug)]
pub struct DynamoTableClient {
    /// DynamoDB client.
    client: Client,
}

impl DynamoTableClient {
    /// Creates a new client against the ambient AWS configuration.
    pub async fn new(region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config))
    }

    /// Creates a new client from an existing SDK client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TableClient for DynamoTableClient {
    async fn index_statuses(&self, table: &str) -> Result<Vec<IndexReadiness>> {
        let response = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| ProviderError::api(format!("describe_table failed: {e}")))?;

        let Some(description) = response.table() else {
            return Err(ProviderError::api(format!("Table {table} not found")).into());
        };

        let statuses: Vec<IndexReadiness> = description
            .global_secondary_indexes()
            .iter()
            .map(|index| IndexReadiness {
                index_name: index.index_name().unwrap_or_default().to_string(),
                ready: matches!(index.index_status(), Some(IndexStatus::Active)),
            })
            .collect();

        debug!(
            "Table {table}: {}/{} index(es) ready",
            statuses.iter().filter(|s| s.ready).count(),
            statuses.len()
        );

        Ok(statuses)
    }
}

#[async_trait]
impl TableClient for Box<dyn TableClient> {
    async fn index_statuses(&self, table: &str) -> Result<Vec<IndexReadiness>> {
        (**self).index_statuses(table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readiness(name: &str, ready: bool) -> IndexReadiness {
        IndexReadiness {
            index_name: name.to_string(),
            ready,
        }
    }

    #[test]
    fn test_all_ready_requires_every_index() {
        assert!(IndexReadiness::all_ready(&[]));
        assert!(IndexReadiness::all_ready(&[
            readiness("byName", true),
            readiness("byOwner", true),
        ]));
        assert!(!IndexReadiness::all_ready(&[
            readiness("byName", true),
            readiness("byOwner", false),
        ]));
    }
}
