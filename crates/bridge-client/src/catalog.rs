//! Loaders for the Metabase catalog endpoints.
//!
//! Each loader issues one GET (through the retrying executor) and turns the
//! body into entity lists. They carry no caching of their own; see
//! [`MetadataCache`](crate::cache::MetadataCache).

use crate::column::ColumnDescriptor;
use crate::error::{ClientError, Operation, Result};
use crate::executor::{HttpExecutor, RetryPolicy};
use crate::headers::SESSION_HEADER;
use crate::types::{Database, DatabaseList, TableInfo, TableMetadata};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Authenticated reader for one server's catalog.
#[derive(Debug, Clone)]
pub(crate) struct CatalogLoader {
    executor: HttpExecutor,
    base_url: String,
    token: String,
    policy: RetryPolicy,
}

impl CatalogLoader {
    pub fn new(executor: HttpExecutor, base_url: String, token: String, policy: RetryPolicy) -> Self {
        Self {
            executor,
            base_url,
            token,
            policy,
        }
    }

    /// `GET /api/database`
    pub async fn databases(&self) -> Result<Vec<Database>> {
        let list: DatabaseList = self.get("databases", "/api/database").await?;
        list.data.ok_or_else(|| {
            ClientError::metadata("databases", "response does not contain a 'data' array")
        })
    }

    /// `GET /api/database/{id}/schemas`
    pub async fn schemas(&self, database_id: i64) -> Result<Vec<String>> {
        let path = format!("/api/database/{}/schemas", database_id);
        self.get("schemas", &path).await
    }

    /// `GET /api/database/{id}/schema/{schema}`
    pub async fn tables(&self, database_id: i64, schema: &str) -> Result<Vec<TableInfo>> {
        let path = format!(
            "/api/database/{}/schema/{}",
            database_id,
            urlencoding::encode(schema)
        );
        self.get("tables", &path).await
    }

    /// `GET /api/table/{id}/query_metadata`, keeping only top-level fields.
    pub async fn columns(&self, table_id: i64) -> Result<Vec<ColumnDescriptor>> {
        let path = format!("/api/table/{}/query_metadata", table_id);
        let metadata: TableMetadata = self.get("columns", &path).await?;
        Ok(metadata
            .fields
            .into_iter()
            .filter(|field| field.is_top_level())
            .map(ColumnDescriptor::from)
            .collect())
    }

    async fn get<T: DeserializeOwned>(&self, what: &'static str, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .executor
            .http()
            .get(&url)
            .header(SESSION_HEADER, &self.token)
            .build()
            .map_err(|e| ClientError::Config(format!("Invalid catalog URL {}: {}", url, e)))?;

        let response = self
            .executor
            .execute(Operation::Metadata, request, &self.policy, None)
            .await?;
        let status = response.status;
        let body = response.body;

        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(format!("{} at {}", what, path)));
        }
        if !status.is_success() {
            tracing::warn!(
                path = %path,
                status = status.as_u16(),
                "Catalog request failed"
            );
            return Err(ClientError::metadata(
                what,
                format!("HTTP {}: {}", status.as_u16(), String::from_utf8_lossy(&body)),
            ));
        }

        serde_json::from_slice(&body).map_err(|e| {
            ClientError::metadata(
                what,
                format!(
                    "failed to parse response: {} (body: {})",
                    e,
                    String::from_utf8_lossy(&body)
                ),
            )
        })
    }
}
