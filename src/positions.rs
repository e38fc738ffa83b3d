//! Position lifecycle: admission, order placement, exit monitoring and
//! retention of closed positions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::confirmation::EntryRequest;
use crate::error::{CoreError, Result};
use crate::exchange::retry::{retry_async, RetryConfig};
use crate::exchange::{Account, Candle, Direction, Execution};
use crate::logging::{log, log_exit, log_order_submit, log_risk_check, obj, v_num, v_str, Domain, Level};
use crate::notify::{Notification, Notifier};
use crate::reliability::circuit::CircuitBreaker;
use crate::risk::{Admission, AdmissionInput, Rejection, RiskEngine};
use crate::sizing::{realized_pnl, risk_based_size, stop_distance};
use crate::zones::PriceRange;

pub const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionParams {
    /// Percent of equity risked per trade, 1.0 = 1%.
    pub risk_pct: f64,
    pub max_positions: usize,
    pub retention_secs: u64,
    pub max_exec_failures: u32,
    pub exec_cooldown_secs: u64,
    pub io_timeout_secs: u64,
}

impl Default for PositionParams {
    fn default() -> Self {
        Self {
            risk_pct: 1.0,
            max_positions: 3,
            retention_secs: 7 * SECS_PER_DAY,
            max_exec_failures: 5,
            exec_cooldown_secs: 900,
            io_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    ReboundZone,
    Manual,
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::ReboundZone => "rebound_zone",
            ExitReason::Manual => "manual",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub pattern_id: String,
    pub order_id: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub size: f64,
    pub stop_loss: f64,
    pub take_profits: Vec<f64>,
    pub rebound_zone: PriceRange,
    pub status: PositionStatus,
    pub exit_reason: Option<ExitReason>,
    pub exit_price: Option<f64>,
    pub fees: f64,
    pub pnl: f64,
    pub opened_at: u64,
    pub closed_at: Option<u64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Exit condition for `bar`, checked stop first, then the nearest
    /// target, then a close back inside the rebound zone.
    pub fn exit_signal(&self, bar: &Candle) -> Option<ExitReason> {
        let stopped = match self.direction {
            Direction::Bullish => bar.l <= self.stop_loss,
            Direction::Bearish => bar.h >= self.stop_loss,
        };
        if stopped {
            return Some(ExitReason::StopLoss);
        }
        if let Some(&target) = self.take_profits.first() {
            let reached = match self.direction {
                Direction::Bullish => bar.h >= target,
                Direction::Bearish => bar.l <= target,
            };
            if reached {
                return Some(ExitReason::TakeProfit);
            }
        }
        if self.rebound_zone.contains(bar.c) {
            return Some(ExitReason::ReboundZone);
        }
        None
    }

    fn mark_closed(&mut self, reason: ExitReason, exit_price: f64, exit_fee: f64, now: u64) -> Result<()> {
        if !self.is_open() {
            return Err(CoreError::Execution(format!("position {} already closed", self.id)));
        }
        let entry_fee = self.fees;
        self.pnl = realized_pnl(self.direction, self.entry_price, exit_price, self.size, entry_fee, exit_fee);
        self.fees = entry_fee + exit_fee;
        self.exit_price = Some(exit_price);
        self.exit_reason = Some(reason);
        self.closed_at = Some(now);
        self.status = PositionStatus::Closed;
        Ok(())
    }
}

/// Result of trying to act on an entry request.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Opened(String),
    Rejected(Rejection),
}

pub struct PositionManager {
    execution: Arc<dyn Execution + Send + Sync>,
    account: Arc<dyn Account + Send + Sync>,
    notifier: Arc<dyn Notifier + Send + Sync>,
    risk: RiskEngine,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    params: PositionParams,
    positions: Vec<Position>,
    pending: usize,
    seq: u64,
}

impl PositionManager {
    pub fn new(
        execution: Arc<dyn Execution + Send + Sync>,
        account: Arc<dyn Account + Send + Sync>,
        notifier: Arc<dyn Notifier + Send + Sync>,
        params: PositionParams,
    ) -> Self {
        Self {
            execution,
            account,
            notifier,
            risk: RiskEngine::new(params.max_positions),
            breaker: CircuitBreaker::new(params.max_exec_failures, params.exec_cooldown_secs),
            retry: RetryConfig::with_timeout_secs(params.io_timeout_secs),
            params,
            positions: Vec::new(),
            pending: 0,
            seq: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn get(&self, id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    pub fn open_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }

    fn slots_in_use(&self) -> usize {
        self.open_count() + self.pending
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Forward the latest price to the execution venue.
    pub fn mark_price(&self, price: f64) {
        self.execution.mark_price(price);
    }

    /// Size, admit and place an order for a confirmed pattern. Execution
    /// failures are notified and returned; the reserved slot is released.
    pub async fn open(&mut self, req: &EntryRequest, now: u64) -> Result<EntryOutcome> {
        let in_use = self.slots_in_use();
        if !self.risk.has_capacity(in_use) {
            log_risk_check("max_positions", "reject", in_use as f64, self.risk.max_positions() as f64);
            return Ok(EntryOutcome::Rejected(Rejection::MaxPositions));
        }

        self.pending += 1;
        let result = self.place(req, now).await;
        self.pending -= 1;

        match result {
            Ok(Ok(position)) => {
                let id = position.id.clone();
                self.notifier.notify(&Notification::PositionOpened {
                    position_id: id.clone(),
                    pattern_id: position.pattern_id.clone(),
                    direction: position.direction,
                    entry_price: position.entry_price,
                    size: position.size,
                    stop_loss: position.stop_loss,
                });
                self.positions.push(position);
                Ok(EntryOutcome::Opened(id))
            }
            Ok(Err(rejection)) => Ok(EntryOutcome::Rejected(rejection)),
            Err(e) => {
                self.notifier.notify(&Notification::Error {
                    context: format!("open {}", req.pattern_id),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Runs with this entry's slot already reserved.
    async fn place(
        &mut self,
        req: &EntryRequest,
        now: u64,
    ) -> Result<std::result::Result<Position, Rejection>> {
        let account = self.account.clone();
        let equity = retry_async(&self.retry, "get_equity", || account.get_equity()).await?;

        let input = AdmissionInput {
            slots_in_use: self.slots_in_use().saturating_sub(1),
            // A stop on the wrong side of the entry leaves nothing to size on.
            stop_distance: if req.direction.beyond(req.entry_price, req.stop_loss) {
                stop_distance(req.entry_price, req.stop_loss)
            } else {
                0.0
            },
            equity,
            circuit_allows: self.breaker.allow(now),
        };
        if let Admission::Rejected(rejection) = self.risk.admit(&input) {
            return Ok(Err(rejection));
        }

        let size = risk_based_size(equity, self.params.risk_pct, req.entry_price, req.stop_loss);
        log_order_submit(&req.pattern_id, req.direction.side(), size, req.stop_loss);

        let execution = self.execution.clone();
        let placed = retry_async(&self.retry, "place_order", || {
            execution.place_order(req.direction, size, req.stop_loss, &req.take_profits)
        })
        .await;
        let order = match placed {
            Ok(order) => {
                self.breaker.record_success();
                order
            }
            Err(e) => {
                self.breaker.record_failure(now);
                return Err(e);
            }
        };

        self.seq += 1;
        Ok(Ok(Position {
            id: format!("pos-{}-{}", now, self.seq),
            pattern_id: req.pattern_id.clone(),
            order_id: order.order_id,
            direction: req.direction,
            entry_price: order.filled_price,
            size,
            stop_loss: req.stop_loss,
            take_profits: req.take_profits.clone(),
            rebound_zone: req.rebound_zone,
            status: PositionStatus::Open,
            exit_reason: None,
            exit_price: None,
            fees: order.fee,
            pnl: 0.0,
            opened_at: now,
            closed_at: None,
        }))
    }

    /// Check every open position against `bar` and close those whose exit
    /// fired. Positions opened on this bar are skipped. Returns the ids
    /// closed.
    pub async fn on_bar(&mut self, bar: &Candle) -> Vec<String> {
        let hits: Vec<(usize, ExitReason)> = self
            .positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_open() && p.opened_at < bar.ts)
            .filter_map(|(i, p)| p.exit_signal(bar).map(|r| (i, r)))
            .collect();

        let mut closed = Vec::new();
        for (idx, reason) in hits {
            if self.close_at(idx, reason, bar.ts).await.is_ok() {
                closed.push(self.positions[idx].id.clone());
            }
        }
        closed
    }

    /// Force-close every open position.
    pub async fn close_all(&mut self, reason: ExitReason, now: u64) -> usize {
        let open: Vec<usize> = (0..self.positions.len()).filter(|&i| self.positions[i].is_open()).collect();
        let mut count = 0;
        for idx in open {
            if self.close_at(idx, reason, now).await.is_ok() {
                count += 1;
            }
        }
        count
    }

    async fn close_at(&mut self, idx: usize, reason: ExitReason, now: u64) -> Result<()> {
        let order_id = self.positions[idx].order_id.clone();
        let execution = self.execution.clone();
        let exit = match retry_async(&self.retry, "close_order", || execution.close_order(&order_id)).await {
            Ok(exit) => {
                self.breaker.record_success();
                exit
            }
            Err(e) => {
                self.breaker.record_failure(now);
                let position = &self.positions[idx];
                self.notifier.notify(&Notification::Error {
                    context: format!("close {}", position.id),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let position = &mut self.positions[idx];
        position.mark_closed(reason, exit.exit_price, exit.fee, now)?;
        log_exit(
            &position.id,
            position.exit_reason.map_or("", |r| r.as_str()),
            exit.exit_price,
            exit.fee,
            position.pnl,
        );
        self.notifier.notify(&Notification::PositionClosed {
            position_id: position.id.clone(),
            reason: position.exit_reason.map_or("", |r| r.as_str()).to_string(),
            exit_price: exit.exit_price,
            pnl: position.pnl,
        });
        Ok(())
    }

    /// Remove closed positions past retention and hand them back.
    pub fn purge(&mut self, now: u64) -> Vec<Position> {
        let retention = self.params.retention_secs;
        let (expired, kept): (Vec<Position>, Vec<Position>) = self
            .positions
            .drain(..)
            .partition(|p| p.closed_at.is_some_and(|t| now >= t.saturating_add(retention)));
        self.positions = kept;
        if !expired.is_empty() {
            log(
                Level::Debug,
                Domain::Risk,
                "positions_purged",
                obj(&[("count", v_num(expired.len() as f64)), ("now", v_num(now as f64))]),
            );
        }
        expired
    }

    /// Take back positions handed out by `purge`, e.g. after a failed archive.
    pub fn restore(&mut self, positions: Vec<Position>) {
        self.positions.extend(positions);
        self.positions.sort_by_key(|p| p.opened_at);
    }

    pub fn closed(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| !p.is_open())
    }

    /// Realised PnL of positions closed on the UTC day containing `now`.
    pub fn daily_pnl(&self, now: u64) -> f64 {
        let day = now / SECS_PER_DAY;
        self.closed()
            .filter(|p| p.closed_at.is_some_and(|t| t / SECS_PER_DAY == day))
            .map(|p| p.pnl)
            .sum()
    }

    pub fn log_summary(&self, now: u64) {
        log(
            Level::Info,
            Domain::Risk,
            "positions_summary",
            obj(&[
                ("open", v_num(self.open_count() as f64)),
                ("tracked", v_num(self.positions.len() as f64)),
                ("daily_pnl", v_num(self.daily_pnl(now))),
                ("circuit", v_str(self.breaker.state.as_str())),
            ]),
        );
    }
}
