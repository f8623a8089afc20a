//! redb table definitions for the ModelGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types), except the two index tables which hold raw `u64`s.
//! Composite keys follow the pattern `{model}/{version}` or
//! `{model}:{id:020}` (zero-padded ids keep prefix scans in append
//! order).

use redb::TableDefinition;

/// Model versions keyed by `{model}/{version}`.
pub const VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("versions");

/// Append-only deployment log keyed by `{model}:{id:020}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Append-only alert log keyed by `{deployment_id:020}:{alert_id:020}`.
pub const ALERTS: TableDefinition<&str, &[u8]> = TableDefinition::new("alerts");

/// Retrain requests keyed by `{model}:{id:020}`.
pub const RETRAIN: TableDefinition<&str, &[u8]> = TableDefinition::new("retrain");

/// Active deployment index: `{model}` → deployment id. Repointed in
/// the same transaction that appends to the deployment log.
pub const ACTIVE: TableDefinition<&str, u64> = TableDefinition::new("active");

/// Monotonic id counters: `"deployment"` / `"alert"` / `"retrain"`.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
