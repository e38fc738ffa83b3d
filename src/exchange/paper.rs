use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::exchange::{
    Account, Candle, Direction, Execution, ExitResult, OrderResult, PriceFeed, Timeframe,
    TimeframeRole,
};

#[derive(Debug, Clone, Copy)]
struct PaperFill {
    direction: Direction,
    size: f64,
    entry: f64,
    fee: f64,
}

#[derive(Debug)]
struct PaperBook {
    last_price: f64,
    cash: f64,
    open: HashMap<String, PaperFill>,
}

/// Simulated execution: fills at the last marked price with slippage and a
/// proportional fee. Equity is starting cash plus realised PnL.
#[derive(Debug)]
pub struct PaperExecution {
    pub fee_rate: f64,
    pub slip_rate: f64,
    seq: AtomicU64,
    book: Mutex<PaperBook>,
}

impl PaperExecution {
    pub fn new(equity: f64, fee_rate: f64, slip_rate: f64) -> Self {
        Self {
            fee_rate,
            slip_rate,
            seq: AtomicU64::new(1),
            book: Mutex::new(PaperBook { last_price: 0.0, cash: equity, open: HashMap::new() }),
        }
    }

    fn book(&self) -> Result<std::sync::MutexGuard<'_, PaperBook>> {
        self.book.lock().map_err(|_| CoreError::Execution("paper book poisoned".to_string()))
    }

    pub fn open_orders(&self) -> usize {
        self.book.lock().map(|b| b.open.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Execution for PaperExecution {
    async fn place_order(
        &self,
        direction: Direction,
        size: f64,
        _stop_loss: f64,
        _take_profits: &[f64],
    ) -> Result<OrderResult> {
        if size <= 0.0 || !size.is_finite() {
            return Err(CoreError::Configuration(format!("invalid order size {}", size)));
        }
        let mut book = self.book()?;
        if book.last_price <= 0.0 {
            return Err(CoreError::Execution("no mark price yet".to_string()));
        }
        let price = book.last_price * (1.0 + direction.sign() * self.slip_rate);
        let fee = size * price * self.fee_rate;
        let order_id = format!("paper-{}", self.seq.fetch_add(1, Ordering::SeqCst));
        book.open.insert(order_id.clone(), PaperFill { direction, size, entry: price, fee });
        Ok(OrderResult { order_id, filled_price: price, fee })
    }

    async fn close_order(&self, order_id: &str) -> Result<ExitResult> {
        let mut book = self.book()?;
        let fill = book
            .open
            .remove(order_id)
            .ok_or_else(|| CoreError::Execution(format!("unknown order {}", order_id)))?;
        let price = book.last_price * (1.0 - fill.direction.sign() * self.slip_rate);
        let fee = fill.size * price * self.fee_rate;
        let pnl = (price - fill.entry) * fill.size * fill.direction.sign() - fill.fee - fee;
        book.cash += pnl;
        Ok(ExitResult { exit_price: price, fee })
    }

    fn mark_price(&self, price: f64) {
        if let Ok(mut book) = self.book.lock() {
            book.last_price = price;
        }
    }
}

#[async_trait]
impl Account for PaperExecution {
    async fn get_equity(&self) -> Result<f64> {
        Ok(self.book()?.cash)
    }
}

/// In-memory feed over prerecorded bars, one cursor per timeframe role.
#[derive(Debug, Default)]
pub struct ReplayFeed {
    series: HashMap<TimeframeRole, (Vec<Candle>, usize)>,
}

impl ReplayFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install bars for a role. Bars are sorted and duplicates by timestamp
    /// are dropped so the sequence is strictly increasing.
    pub fn with_bars(mut self, role: TimeframeRole, mut bars: Vec<Candle>) -> Self {
        bars.sort_by_key(|c| c.ts);
        bars.dedup_by_key(|c| c.ts);
        self.series.insert(role, (bars, 0));
        self
    }

    pub fn remaining(&self, role: TimeframeRole) -> usize {
        self.series.get(&role).map_or(0, |(bars, cur)| bars.len().saturating_sub(*cur))
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    async fn next_bar(&mut self, timeframe: &Timeframe) -> Result<Option<Candle>> {
        let Some((bars, cursor)) = self.series.get_mut(&timeframe.role) else {
            return Err(CoreError::FeedUnavailable(format!("no replay data for {}", timeframe.interval)));
        };
        let bar = bars.get(*cursor).copied();
        if bar.is_some() {
            *cursor += 1;
        }
        Ok(bar)
    }

    fn restart(&mut self, timeframe: &Timeframe) {
        if let Some((_, cursor)) = self.series.get_mut(&timeframe.role) {
            *cursor = 0;
        }
    }
}
