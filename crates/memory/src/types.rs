//! Row types for the inventory store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// A host as stored in `hosts_v2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub aliases: Vec<String>,
    pub environment: Option<String>,
    pub groups: Vec<String>,
    pub role: Option<String>,
    pub service: Option<String>,
    pub ssh_port: u16,
    pub status: String,
    pub source_id: Option<i64>,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl Host {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            hostname: row.get("hostname"),
            ip_address: row.get("ip_address"),
            aliases: parse_string_list(row.get::<Option<String>, _>("aliases")),
            environment: row.get("environment"),
            groups: parse_string_list(row.get::<Option<String>, _>("groups")),
            role: row.get("role"),
            service: row.get("service"),
            ssh_port: row.get::<i64, _>("ssh_port") as u16,
            status: row.get("status"),
            source_id: row.get("source_id"),
            metadata: parse_object(row.get::<Option<String>, _>("metadata")),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Input for `add_host`/`bulk_add_hosts`.  `None` fields preserve the
/// current value on update and take the column default on insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInput {
    pub hostname: String,
    pub ip_address: Option<String>,
    pub aliases: Option<Vec<String>>,
    pub environment: Option<String>,
    pub groups: Option<Vec<String>>,
    pub role: Option<String>,
    pub service: Option<String>,
    pub ssh_port: Option<u16>,
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl HostInput {
    pub fn named(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }
}

/// One entry of a host's version history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostVersion {
    pub id: i64,
    pub host_id: i64,
    pub version: i64,
    pub changes: Value,
    pub changed_by: String,
    pub created_at: String,
}

impl HostVersion {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            host_id: row.get("host_id"),
            version: row.get("version"),
            changes: serde_json::from_str(&row.get::<String, _>("changes"))
                .unwrap_or(Value::Null),
            changed_by: row.get("changed_by"),
            created_at: row.get("created_at"),
        }
    }
}

/// Permanent deletion audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDeletion {
    pub id: i64,
    pub host_id: i64,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub aliases: Vec<String>,
    pub environment: Option<String>,
    pub groups: Vec<String>,
    pub role: Option<String>,
    pub service: Option<String>,
    pub ssh_port: Option<i64>,
    pub status: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub deleted_by: String,
    pub deletion_reason: Option<String>,
    pub deleted_at: String,
}

impl HostDeletion {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            host_id: row.get("host_id"),
            hostname: row.get("hostname"),
            ip_address: row.get("ip_address"),
            aliases: parse_string_list(row.get::<Option<String>, _>("aliases")),
            environment: row.get("environment"),
            groups: parse_string_list(row.get::<Option<String>, _>("groups")),
            role: row.get("role"),
            service: row.get("service"),
            ssh_port: row.get("ssh_port"),
            status: row.get("status"),
            metadata: parse_object(row.get::<Option<String>, _>("metadata")),
            deleted_by: row.get("deleted_by"),
            deletion_reason: row.get("deletion_reason"),
            deleted_at: row.get("deleted_at"),
        }
    }
}

/// An inventory source (file import, manual entry, API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySource {
    pub id: i64,
    pub name: String,
    pub source_type: String,
    pub file_path: Option<String>,
    pub import_method: String,
    pub host_count: i64,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl InventorySource {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            name: row.get("name"),
            source_type: row.get("source_type"),
            file_path: row.get("file_path"),
            import_method: row.get("import_method"),
            host_count: row.get("host_count"),
            metadata: parse_object(row.get::<Option<String>, _>("metadata")),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// A host↔host relation joined with both hostnames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRelation {
    pub id: i64,
    pub source_host_id: i64,
    pub target_host_id: i64,
    pub source_hostname: String,
    pub target_hostname: String,
    pub relation_type: String,
    pub confidence: f64,
    pub validated_by_user: bool,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl HostRelation {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            source_host_id: row.get("source_host_id"),
            target_host_id: row.get("target_host_id"),
            source_hostname: row.get("source_hostname"),
            target_hostname: row.get("target_hostname"),
            relation_type: row.get("relation_type"),
            confidence: row.get("confidence"),
            validated_by_user: row.get::<i64, _>("validated_by_user") != 0,
            metadata: parse_object(row.get::<Option<String>, _>("metadata")),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Input for `add_relations_batch`.
#[derive(Debug, Clone)]
pub struct RelationInput {
    pub source_hostname: String,
    pub target_hostname: String,
    pub relation_type: String,
    pub confidence: f64,
    pub validated: bool,
    pub metadata: Option<BTreeMap<String, Value>>,
}

/// Result of a batch relation insert: relations whose hosts could not be
/// resolved are skipped, not failed.
#[derive(Debug, Clone, Default)]
pub struct RelationBatchReport {
    pub saved: usize,
    /// `source -> target (type)` descriptions of skipped entries.
    pub skipped: Vec<String>,
}

/// A cached scan result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCacheEntry {
    pub id: i64,
    pub host_id: i64,
    pub scan_type: String,
    pub data: Value,
    pub ttl_seconds: i64,
    pub created_at: String,
    pub expires_at: String,
}

impl ScanCacheEntry {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            host_id: row.get("host_id"),
            scan_type: row.get("scan_type"),
            data: serde_json::from_str(&row.get::<String, _>("data"))
                .unwrap_or(Value::Null),
            ttl_seconds: row.get("ttl_seconds"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }
    }
}

/// Snapshot metadata (without the payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub host_count: i64,
    pub created_at: String,
}

/// A full snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub info: SnapshotInfo,
    pub data: Value,
}

/// Inventory statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_hosts: i64,
    pub by_environment: BTreeMap<String, i64>,
    pub by_source: BTreeMap<String, i64>,
    pub total_relations: i64,
    pub validated_relations: i64,
    /// Non-expired scan-cache entries.
    pub cached_scans: i64,
}

pub(crate) fn parse_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub(crate) fn parse_object(raw: Option<String>) -> BTreeMap<String, Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}
