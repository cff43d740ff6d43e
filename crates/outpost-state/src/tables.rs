//! redb table definitions for the Outpost state store.

use redb::TableDefinition;

/// The placement document, stored as one JSON value.
pub const PLACEMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("placements");

/// Key of the single row in [`PLACEMENTS`].
pub const DOCUMENT_KEY: &str = "document";
