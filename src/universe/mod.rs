//! Symbol-set universes: persistent catalog plus the daily synchronizer.

pub mod catalog;
pub mod synchronizer;


pub use catalog::{RankedSymbol, SqliteCatalog, SymbolInfo, UniverseCatalog, UniverseEntry};
pub use synchronizer::{SyncConfig, SyncResult, SyncState, UniverseSynchronizer};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Added,
    Removed,
    Updated,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Added => "added",
            ChangeAction::Removed => "removed",
            ChangeAction::Updated => "updated",
        }
    }
}

/// One membership change produced by a synchronizer task.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub change_type: String,
    pub universe: String,
    pub symbol: Option<String>,
    pub action: ChangeAction,
    pub reason: String,
    pub timestamp: String,
    pub metadata: serde_json::Value,
}
