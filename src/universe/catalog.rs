//! Persistent catalog of symbols and universes.
//!
//! SQLite with WAL, the same storage posture as the rest of the stack:
//! prepared statements, explicit transactions for multi-row mutations,
//! and one connection guarded by a short-lived mutex.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;
use tracing::{debug, info};

use super::Change;

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub symbol: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<f64>,
    pub symbol_type: String,
    pub active: bool,
    pub initial_load_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct RankedSymbol {
    pub symbol: String,
    pub market_cap: f64,
    pub sector: Option<String>,
    /// 1-based market-cap rank.
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub struct UniverseEntry {
    pub cache_key: String,
    pub symbols: Vec<String>,
    pub category: Option<String>,
    pub metadata: Value,
    pub last_updated: Option<String>,
}

/// Catalog contract consumed by the synchronizer and the priority-cache
/// refresher. All mutations are transactional; `upsert_universe` is
/// atomic per universe so a failed task never commits a partial update.
pub trait UniverseCatalog: Send + Sync {
    fn list_ranked_symbols(&self) -> Result<Vec<RankedSymbol>>;
    fn list_recent_ipos(&self, days: u32) -> Result<Vec<SymbolInfo>>;
    fn read_universe(&self, cache_key: &str) -> Result<Option<UniverseEntry>>;
    fn upsert_universe(
        &self,
        cache_key: &str,
        symbols: &[String],
        category: Option<&str>,
        metadata: &Value,
    ) -> Result<()>;
    fn touch_universe(&self, cache_key: &str) -> Result<()>;
    fn list_universes(&self) -> Result<Vec<UniverseEntry>>;
    fn list_universes_by_category(&self, category: &str) -> Result<Vec<UniverseEntry>>;
    /// Returns the cache keys the symbol was removed from.
    fn delete_symbol_from_all_universes(&self, symbol: &str) -> Result<Vec<String>>;
    fn symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>>;
    fn log_sync_changes(&self, changes: &[Change]) -> Result<()>;
}

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .with_context(|| format!("open catalog at {}", path.display()))?;
        let catalog = Self::init(conn)?;
        info!(path = %path.display(), "universe catalog opened");
        Ok(catalog)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS symbols (
                symbol TEXT PRIMARY KEY,
                name TEXT,
                sector TEXT,
                industry TEXT,
                market_cap REAL,
                type TEXT NOT NULL DEFAULT 'CS',
                active INTEGER NOT NULL DEFAULT 1,
                initial_load_date TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_symbols_market_cap
                ON symbols(market_cap DESC) WHERE active = 1;

            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_key TEXT PRIMARY KEY,
                symbols TEXT NOT NULL,
                category TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_changes_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                change_type TEXT NOT NULL,
                universe TEXT NOT NULL,
                symbol TEXT,
                action TEXT NOT NULL,
                reason TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Seed or update one symbol row. Used by loaders and tests; the
    /// synchronizer itself never writes the symbols table.
    pub fn upsert_symbol(&self, info: &SymbolInfo) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO symbols (symbol, name, sector, industry, market_cap, type, active, initial_load_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(symbol) DO UPDATE SET
                name = excluded.name,
                sector = excluded.sector,
                industry = excluded.industry,
                market_cap = excluded.market_cap,
                type = excluded.type,
                active = excluded.active,
                initial_load_date = excluded.initial_load_date
            "#,
            params![
                info.symbol,
                info.name,
                info.sector,
                info.industry,
                info.market_cap,
                info.symbol_type,
                info.active as i64,
                info.initial_load_date.map(|d| d.to_string()),
            ],
        )?;
        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<UniverseEntry> {
        let symbols_json: String = row.get("symbols")?;
        let metadata_json: String = row.get("metadata")?;
        Ok(UniverseEntry {
            cache_key: row.get("cache_key")?,
            symbols: serde_json::from_str(&symbols_json).unwrap_or_default(),
            category: row.get("category")?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
            last_updated: row.get("last_updated")?,
        })
    }

    fn row_to_symbol(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolInfo> {
        let date: Option<String> = row.get("initial_load_date")?;
        Ok(SymbolInfo {
            symbol: row.get("symbol")?,
            name: row.get("name")?,
            sector: row.get("sector")?,
            industry: row.get("industry")?,
            market_cap: row.get("market_cap")?,
            symbol_type: row.get("type")?,
            active: row.get::<_, i64>("active")? != 0,
            initial_load_date: date.and_then(|d| d.parse().ok()),
        })
    }
}

impl UniverseCatalog for SqliteCatalog {
    fn list_ranked_symbols(&self) -> Result<Vec<RankedSymbol>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT symbol, market_cap, sector
            FROM symbols
            WHERE active = 1 AND market_cap > 0 AND type IN ('CS', 'ETF')
            ORDER BY market_cap DESC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let mut ranked = Vec::new();
        for (i, row) in rows.enumerate() {
            let (symbol, market_cap, sector) = row?;
            ranked.push(RankedSymbol {
                symbol,
                market_cap,
                sector,
                rank: i + 1,
            });
        }
        Ok(ranked)
    }

    fn list_recent_ipos(&self, days: u32) -> Result<Vec<SymbolInfo>> {
        let cutoff = (Utc::now().date_naive() - chrono::Days::new(days as u64)).to_string();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT symbol, name, sector, industry, market_cap, type, active, initial_load_date
            FROM symbols
            WHERE active = 1 AND initial_load_date >= ?1
            ORDER BY market_cap DESC
            "#,
        )?;
        let rows = stmt.query_map(params![cutoff], Self::row_to_symbol)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn read_universe(&self, cache_key: &str) -> Result<Option<UniverseEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT cache_key, symbols, category, metadata, last_updated
             FROM cache_entries WHERE cache_key = ?1",
        )?;
        let mut rows = stmt.query_map(params![cache_key], Self::row_to_entry)?;
        Ok(rows.next().transpose()?)
    }

    fn upsert_universe(
        &self,
        cache_key: &str,
        symbols: &[String],
        category: Option<&str>,
        metadata: &Value,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO cache_entries (cache_key, symbols, category, metadata, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(cache_key) DO UPDATE SET
                symbols = excluded.symbols,
                category = COALESCE(excluded.category, cache_entries.category),
                metadata = excluded.metadata,
                last_updated = excluded.last_updated
            "#,
            params![
                cache_key,
                serde_json::to_string(symbols)?,
                category,
                metadata.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!(cache_key, count = symbols.len(), "universe upserted");
        Ok(())
    }

    fn touch_universe(&self, cache_key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE cache_entries SET last_updated = ?1 WHERE cache_key = ?2",
            params![Utc::now().to_rfc3339(), cache_key],
        )?;
        Ok(())
    }

    fn list_universes(&self) -> Result<Vec<UniverseEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT cache_key, symbols, category, metadata, last_updated FROM cache_entries",
        )?;
        let rows = stmt.query_map([], Self::row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_universes_by_category(&self, category: &str) -> Result<Vec<UniverseEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT cache_key, symbols, category, metadata, last_updated
             FROM cache_entries WHERE category = ?1",
        )?;
        let rows = stmt.query_map(params![category], Self::row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_symbol_from_all_universes(&self, symbol: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut affected = Vec::new();
        {
            let mut stmt = tx.prepare("SELECT cache_key, symbols FROM cache_entries")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut updates = Vec::new();
            for row in rows {
                let (cache_key, symbols_json) = row?;
                let symbols: Vec<String> = serde_json::from_str(&symbols_json).unwrap_or_default();
                if symbols.iter().any(|s| s == symbol) {
                    let remaining: Vec<String> =
                        symbols.into_iter().filter(|s| s != symbol).collect();
                    updates.push((cache_key, remaining));
                }
            }
            for (cache_key, remaining) in updates {
                tx.execute(
                    "UPDATE cache_entries SET symbols = ?1, last_updated = ?2 WHERE cache_key = ?3",
                    params![
                        serde_json::to_string(&remaining)?,
                        Utc::now().to_rfc3339(),
                        cache_key
                    ],
                )?;
                affected.push(cache_key);
            }
        }
        tx.commit()?;
        Ok(affected)
    }

    fn symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, name, sector, industry, market_cap, type, active, initial_load_date
             FROM symbols WHERE symbol = ?1",
        )?;
        let mut rows = stmt.query_map(params![symbol], Self::row_to_symbol)?;
        Ok(rows.next().transpose()?)
    }

    fn log_sync_changes(&self, changes: &[Change]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO sync_changes_log (change_type, universe, symbol, action, reason, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for change in changes {
                stmt.execute(params![
                    change.change_type,
                    change.universe,
                    change.symbol,
                    change.action.as_str(),
                    change.reason,
                    change.metadata.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = changes.len(), "sync changes logged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed(symbol: &str, market_cap: f64, symbol_type: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            name: None,
            sector: None,
            industry: None,
            market_cap: Some(market_cap),
            symbol_type: symbol_type.to_string(),
            active: true,
            initial_load_date: None,
        }
    }

    #[test]
    fn ranking_orders_by_market_cap_and_skips_inactive() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.upsert_symbol(&seed("SMALL", 1.0e9, "CS")).unwrap();
        catalog.upsert_symbol(&seed("BIG", 9.0e9, "CS")).unwrap();
        catalog.upsert_symbol(&seed("FUND", 5.0e9, "ETF")).unwrap();
        let mut dead = seed("DEAD", 20.0e9, "CS");
        dead.active = false;
        catalog.upsert_symbol(&dead).unwrap();
        // Non-equity types are excluded from the ranking.
        catalog.upsert_symbol(&seed("WARR", 8.0e9, "WARRANT")).unwrap();

        let ranked = catalog.list_ranked_symbols().unwrap();
        let symbols: Vec<&str> = ranked.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BIG", "FUND", "SMALL"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn upsert_universe_is_atomic_replace() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog
            .upsert_universe("u", &["A".to_string()], Some("theme"), &json!({"v": 1}))
            .unwrap();
        catalog
            .upsert_universe("u", &["B".to_string(), "C".to_string()], None, &json!({"v": 2}))
            .unwrap();

        let entry = catalog.read_universe("u").unwrap().unwrap();
        assert_eq!(entry.symbols, vec!["B", "C"]);
        // Category survives a None on re-upsert.
        assert_eq!(entry.category.as_deref(), Some("theme"));
        assert_eq!(entry.metadata["v"], json!(2));
    }

    #[test]
    fn delete_symbol_reports_affected_universes() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog
            .upsert_universe("u1", &["A".to_string(), "B".to_string()], None, &json!({}))
            .unwrap();
        catalog
            .upsert_universe("u2", &["B".to_string()], None, &json!({}))
            .unwrap();
        catalog
            .upsert_universe("u3", &["C".to_string()], None, &json!({}))
            .unwrap();

        let mut affected = catalog.delete_symbol_from_all_universes("B").unwrap();
        affected.sort();
        assert_eq!(affected, vec!["u1", "u2"]);
        assert_eq!(catalog.read_universe("u1").unwrap().unwrap().symbols, vec!["A"]);
        assert!(catalog.read_universe("u2").unwrap().unwrap().symbols.is_empty());
    }

    #[test]
    fn catalog_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let catalog = SqliteCatalog::open(&path).unwrap();
            catalog.upsert_symbol(&seed("AAPL", 3.0e12, "CS")).unwrap();
            catalog
                .upsert_universe("top_1", &["AAPL".to_string()], None, &json!({}))
                .unwrap();
        }
        let catalog = SqliteCatalog::open(&path).unwrap();
        assert!(catalog.symbol_info("AAPL").unwrap().unwrap().active);
        assert_eq!(
            catalog.read_universe("top_1").unwrap().unwrap().symbols,
            vec!["AAPL"]
        );
    }
}
