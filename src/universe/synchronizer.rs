//! Daily reconciliation of universe memberships.
//!
//! State machine: Idle -> WaitingForEod -> Synchronizing -> Publishing ->
//! Idle. Each task runs in its own error boundary so one failure never
//! blocks the rest; running past the completion window is reported, not
//! treated as an error.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::bus::{
    self, MessageBus, CACHE_SYNC_COMPLETE, DELISTING_CLEANUP, IPO_ASSIGNMENT, UNIVERSE_UPDATED,
};

use super::catalog::{SymbolInfo, UniverseCatalog};
use super::{Change, ChangeAction};

const SERVICE_NAME: &str = "cache_entries_synchronizer";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub sync_timeout_minutes: u64,
    pub eod_wait_timeout_seconds: u64,
    /// Ranked-size universes rebuilt by the market-cap task.
    pub universe_limits: Vec<(String, usize)>,
    pub large_cap_floor: f64,
    pub mid_cap_floor: f64,
    pub small_cap_floor: f64,
    pub ipo_window_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_timeout_minutes: 30,
            eod_wait_timeout_seconds: 3600,
            universe_limits: vec![
                ("top_100".to_string(), 100),
                ("top_500".to_string(), 500),
                ("top_1000".to_string(), 1000),
                ("top_2000".to_string(), 2000),
            ],
            large_cap_floor: 10e9,
            mid_cap_floor: 2e9,
            small_cap_floor: 300e6,
            ipo_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    WaitingForEod,
    Synchronizing,
    Publishing,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub name: String,
    pub status: String,
    pub changes_count: usize,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSummary {
    pub total_changes: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_action: BTreeMap<String, usize>,
    pub by_universe: BTreeMap<String, usize>,
    pub most_active_universe: Option<(String, usize)>,
}

impl ChangeSummary {
    fn from_changes(changes: &[Change]) -> Self {
        let mut summary = ChangeSummary {
            total_changes: changes.len(),
            ..Default::default()
        };
        for change in changes {
            *summary.by_type.entry(change.change_type.clone()).or_insert(0) += 1;
            *summary
                .by_action
                .entry(change.action.as_str().to_string())
                .or_insert(0) += 1;
            *summary.by_universe.entry(change.universe.clone()).or_insert(0) += 1;
        }
        summary.most_active_universe = summary
            .by_universe
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(universe, count)| (universe.clone(), *count));
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub timestamp: String,
    pub sync_status: String,
    pub total_changes: usize,
    pub task_results: Vec<TaskResult>,
    pub changes_summary: ChangeSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eod_signal_received: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_sync_duration_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub within_time_window: Option<bool>,
    #[serde(skip)]
    pub changes: Vec<Change>,
}

pub struct UniverseSynchronizer {
    catalog: Arc<dyn UniverseCatalog>,
    bus: Arc<dyn MessageBus>,
    config: SyncConfig,
    state: Mutex<SyncState>,
}

impl UniverseSynchronizer {
    pub fn new(
        catalog: Arc<dyn UniverseCatalog>,
        bus: Arc<dyn MessageBus>,
        config: SyncConfig,
    ) -> Self {
        Self {
            catalog,
            bus,
            config,
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Full daily cycle: wait for the EOD signal (proceeding anyway on
    /// timeout or bus failure), then reconcile.
    pub async fn daily_sync(&self) -> SyncResult {
        let started = Instant::now();
        info!("=== starting daily universe synchronization ===");

        *self.state.lock() = SyncState::WaitingForEod;
        let timeout = Duration::from_secs(self.config.eod_wait_timeout_seconds);
        let eod_received = match self.bus.wait_for_eod(timeout).await {
            Ok(received) => {
                if !received {
                    warn!("EOD signal timeout, proceeding with synchronization");
                }
                received
            }
            Err(e) => {
                warn!("EOD wait failed ({e:#}), proceeding with synchronization");
                false
            }
        };

        let mut result = self.perform_synchronization().await;
        result.eod_signal_received = Some(eod_received);

        let duration_minutes = started.elapsed().as_secs_f64() / 60.0;
        let within_window = duration_minutes <= self.config.sync_timeout_minutes as f64;
        result.total_sync_duration_minutes = Some(duration_minutes);
        result.within_time_window = Some(within_window);
        if within_window {
            info!(
                minutes = format!("{duration_minutes:.1}"),
                "daily synchronization complete"
            );
        } else {
            warn!(
                minutes = format!("{duration_minutes:.1}"),
                window_minutes = self.config.sync_timeout_minutes,
                "synchronization exceeded time window"
            );
        }
        result
    }

    /// Run all tasks without waiting for EOD.
    pub async fn perform_synchronization(&self) -> SyncResult {
        *self.state.lock() = SyncState::Synchronizing;

        let mut all_changes: Vec<Change> = Vec::new();
        let mut task_results = Vec::new();

        type Task<'a> = (&'static str, Box<dyn Fn() -> Result<Vec<Change>> + 'a>);
        let tasks: Vec<Task<'_>> = vec![
            (
                "market_cap_recalculation",
                Box::new(|| self.market_cap_recalculation()),
            ),
            (
                "ipo_universe_assignment",
                Box::new(|| self.ipo_universe_assignment()),
            ),
            ("delisted_cleanup", Box::new(|| self.delisted_cleanup())),
            ("theme_rebalancing", Box::new(|| self.theme_rebalancing())),
            (
                "etf_universe_maintenance",
                Box::new(|| self.etf_universe_maintenance()),
            ),
        ];

        for (name, task) in tasks {
            let task_start = Instant::now();
            info!(task = name, "starting synchronization task");
            // Per-task error boundary: a failed task is reported and the
            // remaining tasks still run.
            match task() {
                Ok(changes) => {
                    let duration = task_start.elapsed().as_secs_f64();
                    info!(task = name, changes = changes.len(), "task complete");
                    task_results.push(TaskResult {
                        name: name.to_string(),
                        status: "completed".to_string(),
                        changes_count: changes.len(),
                        duration_seconds: duration,
                        error: None,
                    });
                    all_changes.extend(changes);
                }
                Err(e) => {
                    error!(task = name, "task failed: {e:#}");
                    task_results.push(TaskResult {
                        name: name.to_string(),
                        status: "failed".to_string(),
                        changes_count: 0,
                        duration_seconds: task_start.elapsed().as_secs_f64(),
                        error: Some(format!("{e:#}")),
                    });
                }
            }
        }

        if let Err(e) = self.catalog.log_sync_changes(&all_changes) {
            warn!("sync change logging failed: {e:#}");
        }

        *self.state.lock() = SyncState::Publishing;
        self.publish_notifications(&all_changes, &task_results).await;
        *self.state.lock() = SyncState::Idle;

        SyncResult {
            timestamp: Utc::now().to_rfc3339(),
            sync_status: "completed".to_string(),
            total_changes: all_changes.len(),
            task_results,
            changes_summary: ChangeSummary::from_changes(&all_changes),
            eod_signal_received: None,
            total_sync_duration_minutes: None,
            within_time_window: None,
            changes: all_changes,
        }
    }

    /// Task 1: rebuild ranked-size and cap-band universes from the
    /// current market-cap ordering.
    pub fn market_cap_recalculation(&self) -> Result<Vec<Change>> {
        let ranked = self.catalog.list_ranked_symbols()?;
        info!(symbols = ranked.len(), "processing market cap updates");

        let mut universes: Vec<(String, Vec<&super::catalog::RankedSymbol>)> = Vec::new();
        for (name, limit) in &self.config.universe_limits {
            if ranked.len() >= *limit {
                universes.push((name.clone(), ranked.iter().take(*limit).collect()));
            }
        }

        let large: Vec<_> = ranked
            .iter()
            .filter(|r| r.market_cap >= self.config.large_cap_floor)
            .collect();
        let mid: Vec<_> = ranked
            .iter()
            .filter(|r| {
                r.market_cap >= self.config.mid_cap_floor
                    && r.market_cap < self.config.large_cap_floor
            })
            .collect();
        let small: Vec<_> = ranked
            .iter()
            .filter(|r| {
                r.market_cap >= self.config.small_cap_floor
                    && r.market_cap < self.config.mid_cap_floor
            })
            .collect();
        for (name, members) in [("large_cap", large), ("mid_cap", mid), ("small_cap", small)] {
            if !members.is_empty() {
                universes.push((name.to_string(), members));
            }
        }

        let mut changes = Vec::new();
        for (universe, members) in universes {
            let new_symbols: Vec<String> = members.iter().map(|r| r.symbol.clone()).collect();
            let old_symbols = self
                .catalog
                .read_universe(&universe)?
                .map(|e| e.symbols)
                .unwrap_or_default();

            let old_set: HashSet<&String> = old_symbols.iter().collect();
            let new_set: HashSet<&String> = new_symbols.iter().collect();
            if old_set == new_set {
                continue;
            }

            self.catalog.upsert_universe(
                &universe,
                &new_symbols,
                None,
                &json!({
                    "update_type": "market_cap_recalculation",
                    "total_symbols": new_symbols.len(),
                }),
            )?;

            for symbol in new_symbols.iter().filter(|s| !old_set.contains(s)) {
                let rank = members
                    .iter()
                    .find(|r| &r.symbol == symbol)
                    .map(|r| r.rank);
                changes.push(self.change(
                    "market_cap_update",
                    &universe,
                    Some(symbol.clone()),
                    ChangeAction::Added,
                    format!("Market cap ranking qualified for {universe}"),
                    json!({ "market_cap_rank": rank }),
                ));
            }
            for symbol in old_symbols.iter().filter(|s| !new_set.contains(s)) {
                changes.push(self.change(
                    "market_cap_update",
                    &universe,
                    Some(symbol.clone()),
                    ChangeAction::Removed,
                    format!("Market cap ranking no longer qualifies for {universe}"),
                    json!({ "reason": "market_cap_drop" }),
                ));
            }
        }

        info!(changes = changes.len(), "market cap recalculation complete");
        Ok(changes)
    }

    /// Task 2: assign recent IPOs that sit in no universe yet.
    pub fn ipo_universe_assignment(&self) -> Result<Vec<Change>> {
        let ipos = self.catalog.list_recent_ipos(self.config.ipo_window_days)?;
        let assigned: HashSet<String> = self
            .catalog
            .list_universes()?
            .into_iter()
            .flat_map(|e| e.symbols)
            .collect();

        let mut changes = Vec::new();
        for ipo in ipos {
            if assigned.contains(&ipo.symbol) {
                continue;
            }
            for universe in self.determine_universe_assignment(&ipo) {
                let mut symbols = self
                    .catalog
                    .read_universe(&universe)?
                    .map(|e| e.symbols)
                    .unwrap_or_default();
                if symbols.iter().any(|s| s == &ipo.symbol) {
                    continue;
                }
                symbols.push(ipo.symbol.clone());
                self.catalog.upsert_universe(
                    &universe,
                    &symbols,
                    None,
                    &json!({
                        "update_type": "ipo_assignment",
                        "assignment_reason": format!(
                            "New IPO - {} sector",
                            ipo.sector.as_deref().unwrap_or("Unknown")
                        ),
                    }),
                )?;
                changes.push(self.change(
                    "ipo_assignment",
                    &universe,
                    Some(ipo.symbol.clone()),
                    ChangeAction::Added,
                    format!(
                        "New IPO assigned - Sector: {}, Market Cap: ${:.1}B",
                        ipo.sector.as_deref().unwrap_or("Unknown"),
                        ipo.market_cap.unwrap_or(0.0) / 1e9
                    ),
                    json!({
                        "sector": ipo.sector,
                        "industry": ipo.industry,
                        "market_cap": ipo.market_cap,
                        "symbol_type": ipo.symbol_type,
                    }),
                ));
            }
        }

        info!(assignments = changes.len(), "IPO assignment complete");
        Ok(changes)
    }

    /// Target universes for a new symbol: cap band + sector mapping +
    /// type mapping, with a general-market fallback.
    pub fn determine_universe_assignment(&self, info: &SymbolInfo) -> Vec<String> {
        let mut assignments: Vec<String> = Vec::new();
        let mut push = |name: &str, assignments: &mut Vec<String>| {
            if !assignments.iter().any(|a| a == name) {
                assignments.push(name.to_string());
            }
        };

        let market_cap = info.market_cap.unwrap_or(0.0);
        if market_cap >= self.config.large_cap_floor {
            push("large_cap", &mut assignments);
        } else if market_cap >= self.config.mid_cap_floor {
            push("mid_cap", &mut assignments);
        } else if market_cap >= self.config.small_cap_floor {
            push("small_cap", &mut assignments);
        }

        let sector = info.sector.as_deref().unwrap_or("").to_lowercase();
        let sector_mappings: [(&str, &[&str]); 7] = [
            ("technology", &["tech_growth", "high_growth"]),
            ("healthcare", &["defensive_growth", "large_cap"]),
            ("financial", &["financial_services", "value_oriented"]),
            ("energy", &["commodity_related", "cyclical"]),
            ("consumer", &["consumer_focused"]),
            ("industrial", &["industrial_growth"]),
            ("utilities", &["dividend_focused", "defensive"]),
        ];
        for (key, universes) in sector_mappings {
            if sector.contains(key) {
                for universe in universes {
                    push(universe, &mut assignments);
                }
            }
        }

        match info.symbol_type.as_str() {
            "ETF" => push("etf_universe", &mut assignments),
            "CS" => push("stock_universe", &mut assignments),
            _ => {}
        }

        if assignments.is_empty() {
            if market_cap > 1e9 {
                push("general_market", &mut assignments);
            } else {
                push("small_cap_general", &mut assignments);
            }
        }
        assignments
    }

    /// Task 3: remove symbols that are gone or inactive in the catalog
    /// from every universe containing them.
    pub fn delisted_cleanup(&self) -> Result<Vec<Change>> {
        let in_universes: HashSet<String> = self
            .catalog
            .list_universes()?
            .into_iter()
            .flat_map(|e| e.symbols)
            .collect();

        let mut changes = Vec::new();
        for symbol in in_universes {
            let delisted = match self.catalog.symbol_info(&symbol)? {
                None => true,
                Some(info) => !info.active,
            };
            if !delisted {
                continue;
            }
            for universe in self.catalog.delete_symbol_from_all_universes(&symbol)? {
                changes.push(self.change(
                    "delisting_cleanup",
                    &universe,
                    Some(symbol.clone()),
                    ChangeAction::Removed,
                    "Symbol delisted or deactivated".to_string(),
                    json!({ "cleanup_type": "delisting" }),
                ));
            }
        }

        if changes.is_empty() {
            info!("no delisted symbols found in universes");
        } else {
            info!(removals = changes.len(), "delisting cleanup complete");
        }
        Ok(changes)
    }

    /// Task 4: placeholder until explicit rebalancing rules exist.
    pub fn theme_rebalancing(&self) -> Result<Vec<Change>> {
        info!("theme rebalancing: no changes needed");
        Ok(Vec::new())
    }

    /// Task 5: refresh metadata timestamps on ETF-category universes.
    pub fn etf_universe_maintenance(&self) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for entry in self.catalog.list_universes_by_category("ETF")? {
            if entry.symbols.is_empty() {
                continue;
            }
            self.catalog.touch_universe(&entry.cache_key)?;
            changes.push(self.change(
                "etf_maintenance",
                &entry.cache_key,
                None,
                ChangeAction::Updated,
                "ETF universe metadata refresh".to_string(),
                json!({ "symbol_count": entry.symbols.len() }),
            ));
        }
        info!(updates = changes.len(), "ETF universe maintenance complete");
        Ok(changes)
    }

    async fn publish_notifications(&self, changes: &[Change], task_results: &[TaskResult]) {
        let summary = ChangeSummary::from_changes(changes);

        let task_summary: BTreeMap<&str, &str> = task_results
            .iter()
            .map(|t| (t.name.as_str(), t.status.as_str()))
            .collect();
        let complete = bus::envelope(
            SERVICE_NAME,
            "daily_sync_complete",
            json!({
                "total_changes": changes.len(),
                "task_summary": task_summary,
                "changes_by_type": summary.by_type,
            }),
        );
        if let Err(e) = self.bus.publish(CACHE_SYNC_COMPLETE, &complete).await {
            warn!("sync_complete publish failed: {e:#}");
        }

        let mut by_universe: BTreeMap<&str, Vec<&Change>> = BTreeMap::new();
        for change in changes {
            by_universe.entry(&change.universe).or_default().push(change);
        }
        for (universe, universe_changes) in &by_universe {
            let message = bus::envelope(
                SERVICE_NAME,
                "universe_synchronized",
                json!({
                    "universe": universe,
                    "change_count": universe_changes.len(),
                    "actions": universe_changes
                        .iter()
                        .map(|c| c.action.as_str())
                        .collect::<Vec<_>>(),
                }),
            );
            if let Err(e) = self.bus.publish(UNIVERSE_UPDATED, &message).await {
                warn!(%universe, "universe update publish failed: {e:#}");
            }
        }

        // Optional detail streams.
        for (change_type, channel) in [
            ("ipo_assignment", IPO_ASSIGNMENT),
            ("delisting_cleanup", DELISTING_CLEANUP),
        ] {
            let detail: Vec<&Change> = changes
                .iter()
                .filter(|c| c.change_type == change_type)
                .collect();
            if detail.is_empty() {
                continue;
            }
            let message = bus::envelope(
                SERVICE_NAME,
                change_type,
                json!({
                    "change_count": detail.len(),
                    "changes": detail,
                }),
            );
            if let Err(e) = self.bus.publish(channel, &message).await {
                warn!(channel, "detail publish failed: {e:#}");
            }
        }

        info!(
            changes = changes.len(),
            universes = by_universe.len(),
            "sync notifications published"
        );
    }

    fn change(
        &self,
        change_type: &str,
        universe: &str,
        symbol: Option<String>,
        action: ChangeAction,
        reason: String,
        metadata: Value,
    ) -> Change {
        Change {
            change_type: change_type.to_string(),
            universe: universe.to_string(),
            symbol,
            action,
            reason,
            timestamp: Utc::now().to_rfc3339(),
            metadata,
        }
    }
}
