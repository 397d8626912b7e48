//! redb table definitions for the object store.

use redb::TableDefinition;

/// All objects keyed by their full path (`runs/{run_id}/{service_type}/status`, ...).
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
