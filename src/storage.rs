use rusqlite::{params, Connection};

use crate::error::{CoreError, Result};
use crate::positions::Position;

/// SQLite archive of closed positions.
pub struct TradeArchive {
    conn: Connection,
}

impl TradeArchive {
    pub fn new(path: &str) -> Result<Self> {
        let mut archive = Self { conn: Connection::open(path)? };
        archive.init()?;
        Ok(archive)
    }

    pub fn in_memory() -> Result<Self> {
        let mut archive = Self { conn: Connection::open_in_memory()? };
        archive.init()?;
        Ok(archive)
    }

    fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS closed_positions (
                id TEXT PRIMARY KEY,
                pattern_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                size REAL NOT NULL,
                stop_loss REAL NOT NULL,
                exit_reason TEXT NOT NULL,
                fees REAL NOT NULL,
                pnl REAL NOT NULL,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER NOT NULL,
                take_profits TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Upsert closed positions; open ones are skipped. Returns rows written.
    pub fn archive<'a, I>(&mut self, positions: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Position>,
    {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        for p in positions {
            let (Some(exit_price), Some(reason), Some(closed_at)) = (p.exit_price, p.exit_reason, p.closed_at) else {
                continue;
            };
            let take_profits =
                serde_json::to_string(&p.take_profits).map_err(|e| CoreError::Storage(e.to_string()))?;
            tx.execute(
                "INSERT OR REPLACE INTO closed_positions
                 (id, pattern_id, order_id, direction, entry_price, exit_price, size, stop_loss,
                  exit_reason, fees, pnl, opened_at, closed_at, take_profits)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    p.id,
                    p.pattern_id,
                    p.order_id,
                    p.direction.as_str(),
                    p.entry_price,
                    exit_price,
                    p.size,
                    p.stop_loss,
                    reason.as_str(),
                    p.fees,
                    p.pnl,
                    p.opened_at as i64,
                    closed_at as i64,
                    take_profits
                ],
            )?;
            written += 1;
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM closed_positions", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Sum of archived PnL for positions closed in `[from, to)`.
    pub fn pnl_between(&self, from: u64, to: u64) -> Result<f64> {
        let total: Option<f64> = self.conn.query_row(
            "SELECT SUM(pnl) FROM closed_positions WHERE closed_at >= ?1 AND closed_at < ?2",
            params![from as i64, to as i64],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0.0))
    }
}
