//! Wire types for the Metabase REST API.
//!
//! These types mirror the API request and response structures. Catalog types
//! are public; the dataset envelope is only used by the decoder.

use crate::column::ColumnDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A database registered in Metabase (from `GET /api/database`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    /// Metabase database id
    pub id: i64,
    /// Display name, used to select the database
    pub name: String,
    /// Engine (postgres, mysql, ...)
    #[serde(default = "unknown_engine")]
    pub engine: String,
}

fn unknown_engine() -> String {
    "unknown".to_string()
}

/// Envelope of `GET /api/database`.
#[derive(Debug, Deserialize)]
pub(crate) struct DatabaseList {
    pub data: Option<Vec<Database>>,
}

/// A table or view (from `GET /api/database/{id}/schema/{schema}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTableInfo")]
pub struct TableInfo {
    /// Metabase table id, used to load columns
    pub id: i64,
    /// Table name in the source database
    pub name: String,
    /// Human-friendly name (defaults to `name`)
    pub display_name: String,
    /// Schema the table lives in
    pub schema: String,
    /// Metabase entity type, e.g. `entity/TransactionTable`
    pub entity_type: Option<String>,
    /// Description, empty when not set
    pub description: String,
    /// Number of times the table was viewed in Metabase
    pub view_count: Option<i64>,
    /// Row count estimate from the last sync
    pub estimated_row_count: Option<i64>,
}

#[derive(Deserialize)]
struct RawTableInfo {
    id: i64,
    name: String,
    display_name: Option<String>,
    schema: Option<String>,
    entity_type: Option<String>,
    description: Option<String>,
    view_count: Option<i64>,
    estimated_row_count: Option<i64>,
}

impl From<RawTableInfo> for TableInfo {
    fn from(raw: RawTableInfo) -> Self {
        Self {
            display_name: raw.display_name.unwrap_or_else(|| raw.name.clone()),
            id: raw.id,
            name: raw.name,
            schema: raw.schema.unwrap_or_default(),
            entity_type: raw.entity_type,
            description: raw.description.unwrap_or_default(),
            view_count: raw.view_count,
            estimated_row_count: raw.estimated_row_count,
        }
    }
}

/// Body of `GET /api/table/{id}/query_metadata`.
#[derive(Debug, Deserialize)]
pub(crate) struct TableMetadata {
    #[serde(default)]
    pub fields: Vec<RawField>,
}

/// A column as reported by the catalog or by the dataset endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawField {
    #[serde(default)]
    pub id: Value,
    pub name: String,
    pub display_name: Option<String>,
    pub base_type: Option<String>,
    pub semantic_type: Option<String>,
    pub database_type: Option<String>,
    pub effective_type: Option<String>,
    /// Non-null for nested (JSON-unfolded) fields
    #[serde(default)]
    pub nfc_path: Value,
}

impl RawField {
    /// True for plain table columns, false for nested or derived fields.
    pub fn is_top_level(&self) -> bool {
        self.nfc_path.is_null()
    }
}

impl From<RawField> for ColumnDescriptor {
    fn from(raw: RawField) -> Self {
        // Dataset columns can carry a field reference instead of an integer id.
        let field_id = raw.id.as_i64();
        ColumnDescriptor::new(
            raw.name,
            raw.display_name,
            raw.base_type,
            raw.semantic_type,
            raw.database_type,
            raw.effective_type,
            field_id,
        )
    }
}

/// Body of `POST /api/session`.
#[derive(Debug, Serialize)]
pub(crate) struct SessionRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub client_info: Value,
}

/// Response of `POST /api/session`.
#[derive(Debug, Deserialize)]
pub(crate) struct SessionResponse {
    pub id: Option<String>,
}

/// Body of `POST /api/dataset`.
#[derive(Debug, Serialize)]
pub(crate) struct DatasetRequest<'a> {
    pub database: i64,
    #[serde(rename = "type")]
    pub query_type: &'static str,
    pub native: NativeQuery<'a>,
    #[serde(rename = "template-tags")]
    pub template_tags: serde_json::Map<String, Value>,
    pub query_metadata: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct NativeQuery<'a> {
    pub query: &'a str,
}

/// Response of `POST /api/dataset`.
#[derive(Debug, Deserialize)]
pub(crate) struct DatasetResponse {
    #[serde(default)]
    pub error: Value,
    pub running_time: Option<i64>,
    pub row_count: Option<i64>,
    pub status: Option<String>,
    pub database_id: Option<i64>,
    pub started_at: Option<String>,
    pub cached: Option<Value>,
    pub context: Option<String>,
    pub average_execution_time: Option<i64>,
    pub data: Option<DatasetData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatasetData {
    pub results_timezone: Option<String>,
    pub cols: Option<Vec<RawField>>,
    pub rows: Option<Vec<Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_defaults() {
        let table: TableInfo = serde_json::from_value(json!({
            "id": 12,
            "name": "orders",
            "schema": "public",
            "description": null
        }))
        .unwrap();

        assert_eq!(table.display_name, "orders");
        assert_eq!(table.description, "");
        assert_eq!(table.entity_type, None);
        assert_eq!(table.estimated_row_count, None);
    }

    #[test]
    fn test_database_engine_default() {
        let db: Database = serde_json::from_value(json!({"id": 1, "name": "Sample"})).unwrap();
        assert_eq!(db.engine, "unknown");
    }

    #[test]
    fn test_nested_field_detection() {
        let fields: TableMetadata = serde_json::from_value(json!({
            "fields": [
                {"id": 1, "name": "payload", "base_type": "type/JSON", "nfc_path": null},
                {"id": 2, "name": "payload → user", "base_type": "type/Text", "nfc_path": ["payload", "user"]},
                {"id": 3, "name": "created_at", "base_type": "type/DateTime"}
            ]
        }))
        .unwrap();

        let top: Vec<&str> = fields
            .fields
            .iter()
            .filter(|f| f.is_top_level())
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(top, vec!["payload", "created_at"]);
    }

    #[test]
    fn test_dataset_request_shape() {
        let request = DatasetRequest {
            database: 3,
            query_type: "native",
            native: NativeQuery { query: "SELECT 1" },
            template_tags: serde_json::Map::new(),
            query_metadata: json!({"query_length": 8}),
        };
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["database"], 3);
        assert_eq!(body["type"], "native");
        assert_eq!(body["native"]["query"], "SELECT 1");
        assert_eq!(body["template-tags"], json!({}));
    }

    #[test]
    fn test_field_reference_id_is_not_a_field_id() {
        let raw: RawField = serde_json::from_value(json!({
            "id": ["field", 12, null],
            "name": "count",
            "base_type": "type/Integer"
        }))
        .unwrap();
        let column = ColumnDescriptor::from(raw);
        assert_eq!(column.field_id(), None);
    }
}
