//! Read-mostly snapshot of symbol priority classes.
//!
//! The snapshot is replaced atomically on refresh; admission takes one
//! `load()` per decision and never sees a half-updated map. Refresh reads
//! the `top_priority` / `secondary_priority` universes from the catalog
//! every `priority_cache_refresh_seconds`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::universe::catalog::UniverseCatalog;

pub const TOP_PRIORITY_UNIVERSE: &str = "top_priority";
pub const SECONDARY_PRIORITY_UNIVERSE: &str = "secondary_priority";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Top,
    Secondary,
}

#[derive(Debug, Default)]
struct Snapshot {
    classes: HashMap<String, PriorityClass>,
    loaded: bool,
}

pub struct PriorityCache {
    snapshot: ArcSwap<Snapshot>,
}

impl Default for PriorityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityCache {
    /// Empty cache; admission falls back to base priorities until a
    /// refresh lands.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    pub fn replace(&self, classes: HashMap<String, PriorityClass>) {
        self.snapshot.store(Arc::new(Snapshot {
            classes,
            loaded: true,
        }));
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.load().loaded
    }

    pub fn classify(&self, ticker: &str) -> Option<PriorityClass> {
        self.snapshot.load().classes.get(ticker).copied()
    }

    pub fn priority_set_len(&self) -> usize {
        self.snapshot.load().classes.len()
    }

    /// Throttle gate used under queue pressure. Level 1 admits the
    /// priority set plus a deterministic half of everything else; level 2
    /// admits the priority set only; level 3 admits top-class only.
    pub fn should_process(&self, ticker: &str, throttle_level: u8) -> bool {
        if throttle_level == 0 {
            return true;
        }
        let snapshot = self.snapshot.load();
        if !snapshot.loaded {
            // Nothing to discriminate on; let the overflow rules decide.
            return true;
        }
        let class = snapshot.classes.get(ticker).copied();
        match throttle_level {
            1 => class.is_some() || ticker_slot(ticker) == 0,
            2 => class.is_some(),
            _ => class == Some(PriorityClass::Top),
        }
    }

    pub fn stats(&self) -> PriorityCacheStats {
        let snapshot = self.snapshot.load();
        let top = snapshot
            .classes
            .values()
            .filter(|c| **c == PriorityClass::Top)
            .count();
        PriorityCacheStats {
            loaded: snapshot.loaded,
            top_count: top,
            secondary_count: snapshot.classes.len() - top,
        }
    }

    /// One refresh pass against the catalog.
    pub fn refresh_from_catalog(&self, catalog: &dyn UniverseCatalog) -> anyhow::Result<()> {
        let mut classes = HashMap::new();
        if let Some(entry) = catalog.read_universe(TOP_PRIORITY_UNIVERSE)? {
            for symbol in entry.symbols {
                classes.insert(symbol, PriorityClass::Top);
            }
        }
        if let Some(entry) = catalog.read_universe(SECONDARY_PRIORITY_UNIVERSE)? {
            for symbol in entry.symbols {
                classes.entry(symbol).or_insert(PriorityClass::Secondary);
            }
        }
        debug!(
            priority_symbols = classes.len(),
            "priority cache refreshed from catalog"
        );
        self.replace(classes);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PriorityCacheStats {
    pub loaded: bool,
    pub top_count: usize,
    pub secondary_count: usize,
}

/// Stable two-way split used by level-1 throttling.
fn ticker_slot(ticker: &str) -> u8 {
    (ticker.bytes().fold(0u32, |acc, b| {
        acc.wrapping_mul(31).wrapping_add(b as u32)
    }) % 2) as u8
}

/// Background refresh loop; one pass immediately, then every `interval`.
pub fn spawn_refresher(
    cache: Arc<PriorityCache>,
    catalog: Arc<dyn UniverseCatalog>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let cache = cache.clone();
            let catalog = catalog.clone();
            let result =
                tokio::task::spawn_blocking(move || cache.refresh_from_catalog(catalog.as_ref()))
                    .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("priority cache refresh failed: {e:#}"),
                Err(e) => warn!("priority cache refresh task panicked: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_cache() -> PriorityCache {
        let cache = PriorityCache::new();
        let mut classes = HashMap::new();
        classes.insert("AAPL".to_string(), PriorityClass::Top);
        classes.insert("MSFT".to_string(), PriorityClass::Secondary);
        cache.replace(classes);
        cache
    }

    #[test]
    fn classify_after_replace() {
        let cache = loaded_cache();
        assert_eq!(cache.classify("AAPL"), Some(PriorityClass::Top));
        assert_eq!(cache.classify("MSFT"), Some(PriorityClass::Secondary));
        assert_eq!(cache.classify("ZZZZ"), None);
        assert!(cache.is_loaded());
    }

    #[test]
    fn unloaded_cache_never_throttles() {
        let cache = PriorityCache::new();
        assert!(cache.should_process("ZZZZ", 3));
    }

    #[test]
    fn throttle_levels_tighten_progressively() {
        let cache = loaded_cache();
        // Level 2: priority set only.
        assert!(cache.should_process("AAPL", 2));
        assert!(cache.should_process("MSFT", 2));
        assert!(!cache.should_process("ZZZZ", 2));
        // Level 3: top only.
        assert!(cache.should_process("AAPL", 3));
        assert!(!cache.should_process("MSFT", 3));
        assert!(!cache.should_process("ZZZZ", 3));
        // Level 1 always admits the priority set.
        assert!(cache.should_process("AAPL", 1));
        assert!(cache.should_process("MSFT", 1));
        // Level 1 split is deterministic for non-priority symbols.
        let first = cache.should_process("ZZZZ", 1);
        assert_eq!(cache.should_process("ZZZZ", 1), first);
    }

    #[test]
    fn stats_count_classes() {
        let stats = loaded_cache().stats();
        assert!(stats.loaded);
        assert_eq!(stats.top_count, 1);
        assert_eq!(stats.secondary_count, 1);
    }
}
