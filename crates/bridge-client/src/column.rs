//! Column descriptors and logical type derivation.
//!
//! Metabase reports up to three type names per column: the native database
//! type (`database_type`, e.g. `"int4"`), Metabase's effective type
//! (`effective_type`, e.g. `"type/Integer"`) and the base type
//! (`base_type`). The logical type is derived from the first one present, in
//! that order, except that UUID columns are recognised from any of them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized column type exposed to SQL tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Boolean,
    Integer,
    BigInt,
    Decimal,
    Real,
    Double,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Blob,
    Uuid,
    Json,
}

impl LogicalType {
    /// Name of the type as a generic SQL type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            LogicalType::Boolean => "BOOLEAN",
            LogicalType::Integer => "INTEGER",
            LogicalType::BigInt => "BIGINT",
            LogicalType::Decimal => "DECIMAL",
            LogicalType::Real => "REAL",
            LogicalType::Double => "DOUBLE",
            LogicalType::Text => "VARCHAR",
            LogicalType::Date => "DATE",
            LogicalType::Time => "TIME",
            LogicalType::Timestamp => "TIMESTAMP",
            LogicalType::TimestampTz => "TIMESTAMP WITH TIME ZONE",
            LogicalType::Blob => "BLOB",
            LogicalType::Uuid => "UUID",
            LogicalType::Json => "JSON",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            LogicalType::Integer
                | LogicalType::BigInt
                | LogicalType::Decimal
                | LogicalType::Real
                | LogicalType::Double
        )
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

const ENUM_EFFECTIVE_TYPE: &str = "type/postgresenum";

/// Description of one result or table column. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    name: String,
    display_name: String,
    base_type: Option<String>,
    semantic_type: Option<String>,
    native_type: Option<String>,
    effective_type: Option<String>,
    field_id: Option<i64>,
}

impl ColumnDescriptor {
    /// Create a descriptor. A missing display name falls back to `name`.
    pub fn new(
        name: impl Into<String>,
        display_name: Option<String>,
        base_type: Option<String>,
        semantic_type: Option<String>,
        native_type: Option<String>,
        effective_type: Option<String>,
        field_id: Option<i64>,
    ) -> Self {
        let name = name.into();
        Self {
            display_name: display_name.unwrap_or_else(|| name.clone()),
            name,
            base_type,
            semantic_type,
            native_type,
            effective_type,
            field_id,
        }
    }

    /// Shorthand for a column known only by its base type.
    pub fn with_base_type(name: impl Into<String>, base_type: impl Into<String>) -> Self {
        Self::new(name, None, Some(base_type.into()), None, None, None, None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn base_type(&self) -> Option<&str> {
        self.base_type.as_deref()
    }

    pub fn semantic_type(&self) -> Option<&str> {
        self.semantic_type.as_deref()
    }

    /// Native database type (`database_type` on the wire).
    pub fn native_type(&self) -> Option<&str> {
        self.native_type.as_deref()
    }

    pub fn effective_type(&self) -> Option<&str> {
        self.effective_type.as_deref()
    }

    /// Metabase field id, when the column maps to a catalog field.
    pub fn field_id(&self) -> Option<i64> {
        self.field_id
    }

    fn native_lower(&self) -> Option<String> {
        self.native_type.as_deref().map(str::to_lowercase)
    }

    fn effective_lower(&self) -> Option<String> {
        self.effective_type.as_deref().map(str::to_lowercase)
    }

    fn base_lower(&self) -> Option<String> {
        self.base_type.as_deref().map(str::to_lowercase)
    }

    /// True when any of the type fields identifies a UUID column.
    pub fn is_uuid(&self) -> bool {
        if self.native_lower().as_deref() == Some("uuid") {
            return true;
        }
        if self.effective_lower().as_deref() == Some("type/uuid") {
            return true;
        }
        if let Some(semantic) = self.semantic_type.as_deref() {
            let semantic = semantic.to_lowercase();
            if semantic.contains("uuid") || semantic.contains("guid") {
                return true;
            }
        }
        self.base_lower().as_deref() == Some("type/uuid")
    }

    /// True for PostgreSQL enum columns.
    pub fn is_enum(&self) -> bool {
        self.effective_lower().as_deref() == Some(ENUM_EFFECTIVE_TYPE)
    }

    /// Bare enum type name: `"webhook"."webhook_scope"` becomes `webhook_scope`.
    pub fn enum_type_name(&self) -> Option<String> {
        if !self.is_enum() {
            return None;
        }
        let native = self.native_type.as_deref()?.replace('"', "");
        let name = match native.rfind('.') {
            Some(dot) => &native[dot + 1..],
            None => native.as_str(),
        };
        Some(name.to_string())
    }

    /// True when the semantic type marks a primary key.
    pub fn is_primary_key(&self) -> bool {
        self.semantic_type
            .as_deref()
            .map(|s| s.to_lowercase().contains("type/pk"))
            .unwrap_or(false)
    }

    /// Normalized type, derived with priority native > effective > base.
    pub fn logical_type(&self) -> LogicalType {
        if self.is_uuid() {
            return LogicalType::Uuid;
        }
        if let Some(native) = self.native_lower() {
            if self.is_enum() {
                return LogicalType::Text;
            }
            return native_logical_type(&native);
        }
        if let Some(effective) = self.effective_lower() {
            if let Some(logical) = metabase_logical_type(&effective, true) {
                return logical;
            }
        }
        if let Some(base) = self.base_lower() {
            if let Some(logical) = metabase_logical_type(&base, false) {
                return logical;
            }
        }
        LogicalType::Text
    }

    /// Type name shown to users, e.g. `int4`, `timestamptz`, `uuid`.
    pub fn display_type_name(&self) -> String {
        if self.is_uuid() {
            return "uuid".to_string();
        }
        if let Some(native) = self.native_lower() {
            if self.is_enum() {
                return self
                    .enum_type_name()
                    .map(|n| n.to_lowercase())
                    .unwrap_or_else(|| "enum".to_string());
            }
            return native;
        }
        if let Some(effective) = self.effective_lower() {
            let name = match effective.as_str() {
                "type/boolean" => "boolean",
                "type/uuid" => "uuid",
                ENUM_EFFECTIVE_TYPE => "enum",
                "type/datetimewithlocaltz" => "timestamptz",
                "type/datetime" => "timestamp",
                "type/date" => "date",
                "type/time" => "time",
                "type/text" => "text",
                "type/integer" => "integer",
                "type/biginteger" => "bigint",
                "type/decimal" => "decimal",
                "type/float" => "float",
                "type/blob" => "blob",
                "type/json" => "json",
                other => return other.replace("type/", ""),
            };
            return name.to_string();
        }
        match self.base_lower() {
            Some(base) => base.replace("type/", ""),
            None => "unknown".to_string(),
        }
    }

    /// Display width in characters, as reported to SQL tooling.
    pub fn column_size(&self) -> u32 {
        if self.is_uuid() {
            return 36;
        }
        if let Some(native) = self.native_lower() {
            match native.as_str() {
                "json" | "jsonb" | "text" => return 65_535,
                "varchar" => return 255,
                "timestamptz" | "timestamp" => return 26,
                "int4" => return 10,
                "int8" => return 19,
                "numeric" => return 38,
                "bool" => return 1,
                _ => {}
            }
        }
        match self.logical_type() {
            LogicalType::Integer => 10,
            LogicalType::BigInt => 19,
            LogicalType::Decimal | LogicalType::Double | LogicalType::Real => 38,
            LogicalType::Timestamp | LogicalType::TimestampTz => 26,
            LogicalType::Date => 10,
            LogicalType::Time => 8,
            LogicalType::Boolean => 1,
            LogicalType::Json => i32::MAX as u32,
            LogicalType::Uuid => 36,
            LogicalType::Text | LogicalType::Blob => 255,
        }
    }

    /// Digits after the decimal point reported for numeric columns.
    pub fn decimal_digits(&self) -> u32 {
        match self.logical_type() {
            LogicalType::Decimal | LogicalType::Double | LogicalType::Real => 2,
            _ => 0,
        }
    }
}

fn native_logical_type(native: &str) -> LogicalType {
    match native {
        "bool" | "boolean" => LogicalType::Boolean,
        "uuid" => LogicalType::Uuid,
        "json" | "jsonb" => LogicalType::Json,
        "timestamptz" | "timestamp with time zone" => LogicalType::TimestampTz,
        "timestamp" | "timestamp without time zone" => LogicalType::Timestamp,
        "int2" | "int4" | "integer" | "smallint" => LogicalType::Integer,
        "int8" | "bigint" => LogicalType::BigInt,
        "numeric" | "decimal" => LogicalType::Decimal,
        "float4" | "real" => LogicalType::Real,
        "float8" | "double precision" => LogicalType::Double,
        "bytea" => LogicalType::Blob,
        "date" => LogicalType::Date,
        "time" => LogicalType::Time,
        _ => LogicalType::Text,
    }
}

/// Map a lowercased `type/...` name. Effective types keep the time zone on
/// `type/DateTime`; base types do not.
fn metabase_logical_type(name: &str, effective: bool) -> Option<LogicalType> {
    let logical = match name {
        "type/boolean" => LogicalType::Boolean,
        "type/uuid" => LogicalType::Uuid,
        ENUM_EFFECTIVE_TYPE | "type/text" | "type/string" | "type/*" => LogicalType::Text,
        "type/datetimewithlocaltz" | "type/datetime" if effective => LogicalType::TimestampTz,
        "type/datetimewithlocaltz" | "type/datetime" => LogicalType::Timestamp,
        "type/date" => LogicalType::Date,
        "type/time" => LogicalType::Time,
        "type/integer" => LogicalType::Integer,
        "type/biginteger" => LogicalType::BigInt,
        "type/decimal" | "type/float" => LogicalType::Decimal,
        "type/blob" => LogicalType::Blob,
        "type/json" => LogicalType::Json,
        _ => return None,
    };
    Some(logical)
}
