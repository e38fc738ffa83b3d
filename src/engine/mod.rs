//! Pipeline driver.
//!
//! ```text
//! HTF bars ─► Detector (swings + matcher) ─► Zone ─► Store (tracker + machine)
//!                                                         │
//! LTF bars ─► trackers ─► confirmation machines ─► EntryRequest ─► PositionManager
//! ```
//!
//! The engine is the single owner of all mutable state. Collaborator calls
//! are its only suspension points.

pub mod events;
pub mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;

use crate::confirmation::{ConfirmationMachine, EntryRequest, Transition};
use crate::error::{CoreError, Result};
use crate::exchange::{Account, Candle, Execution, PriceFeed, Timeframe, TimeframeRole};
use crate::harmonic::Pattern;
use crate::logging::{log, log_candle, log_discard, log_pattern, obj, v_num, v_str, Domain, Level};
use crate::notify::{Notification, Notifier};
use crate::positions::{EntryOutcome, ExitReason, PositionManager};
use crate::state::{Config, PatternWatch, PurgeReport, RingBuffer, Store};
use crate::storage::TradeArchive;
use crate::trendline::TrendlineTracker;
use crate::zones::{build_zone, Zone};

pub use events::{EngineEvent, EngineStatus, LowerBarReport};
use pipeline::Detector;

/// Consecutive feed failures before the feed is restarted.
pub const FEED_RESTART_AFTER: u32 = 3;

pub struct Engine {
    cfg: Config,
    detector: Detector,
    ltf: RingBuffer<Candle>,
    last_ltf_ts: Option<u64>,
    /// Lower bars opening before this are history: they drive trackers and
    /// machines but never orders.
    live_from: u64,
    feed_failures: HashMap<TimeframeRole, u32>,
    store: Store,
    positions: PositionManager,
    notifier: Arc<dyn Notifier + Send + Sync>,
}

impl Engine {
    pub fn new(
        cfg: Config,
        execution: Arc<dyn Execution + Send + Sync>,
        account: Arc<dyn Account + Send + Sync>,
        notifier: Arc<dyn Notifier + Send + Sync>,
        archive: Option<TradeArchive>,
    ) -> Self {
        let positions = PositionManager::new(execution, account, notifier.clone(), cfg.position_params());
        Self::with_positions(cfg, positions, notifier, archive)
    }

    /// Build around an existing position manager (custom retry policy, tests).
    pub fn with_positions(
        cfg: Config,
        positions: PositionManager,
        notifier: Arc<dyn Notifier + Send + Sync>,
        archive: Option<TradeArchive>,
    ) -> Self {
        let mut store = Store::new(cfg.pattern_ttl_secs, cfg.zone_ttl_secs);
        if let Some(archive) = archive {
            store = store.with_archive(archive);
        }
        Self {
            detector: Detector::new(cfg.htf_window, cfg.swing_lookback, cfg.bands.clone(), cfg.min_confidence),
            ltf: RingBuffer::new(cfg.ltf_window),
            last_ltf_ts: None,
            live_from: 0,
            feed_failures: HashMap::new(),
            store,
            positions,
            notifier,
            cfg,
        }
    }

    /// Treat lower bars opening before `ts` as warm-up history.
    pub fn set_live_from(&mut self, ts: u64) {
        self.live_from = ts;
    }

    fn is_live(&self, bar: &Candle) -> bool {
        bar.ts >= self.live_from
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub async fn handle(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::HigherBar(candle) => {
                self.on_higher_bar(candle).await;
            }
            EngineEvent::LowerBar(candle) => {
                self.on_lower_bar(candle).await;
            }
            EngineEvent::Tick(now) => {
                self.tick(now)?;
            }
            EngineEvent::Shutdown { reason, now } => {
                self.shutdown(reason, now).await?;
            }
        }
        Ok(())
    }

    /// Feed a closed higher-timeframe bar. Returns the ids of patterns
    /// registered because of it.
    pub async fn on_higher_bar(&mut self, candle: Candle) -> Vec<String> {
        log_candle(&self.cfg.htf.interval, candle.ts, candle.o, candle.h, candle.l, candle.c);
        let detected_at = candle.ts + self.cfg.htf.secs;
        let patterns = self.detector.on_bar(candle, detected_at);

        let mut registered = Vec::new();
        let mut entries = Vec::new();
        for pattern in patterns {
            if self.store.has_seen(&pattern.id) {
                log_discard("store", &format!("duplicate {}", pattern.id));
                continue;
            }
            let zone = match build_zone(&pattern, &self.cfg.zone_params(), detected_at) {
                Ok(z) => z,
                Err(e) => {
                    log_discard("zone", &e.to_string());
                    continue;
                }
            };
            let id = pattern.id.clone();
            if let Some(entry) = self.register(pattern, zone) {
                entries.push(entry);
            }
            registered.push(id);
        }

        if let Some(last) = self.ltf.last() {
            if !self.is_live(&last) {
                for entry in &entries {
                    self.skip_entry(entry);
                }
                return registered;
            }
            for entry in entries {
                // Confirmed from buffered history: enter at the latest price.
                let req = EntryRequest { entry_price: last.c, ts: last.ts, ..entry };
                self.execute_entry(&req, last.ts).await;
            }
        }
        registered
    }

    fn register(&mut self, pattern: Pattern, zone: Zone) -> Option<EntryRequest> {
        log_pattern(&pattern.id, pattern.variant.as_str(), pattern.direction.as_str(), pattern.confidence, pattern.d.price);
        self.notifier.notify(&Notification::PatternDetected {
            pattern_id: pattern.id.clone(),
            variant: pattern.variant.as_str().to_string(),
            direction: pattern.direction,
            confidence: pattern.confidence,
            d_price: pattern.d.price,
        });
        self.notifier.notify(&Notification::ZoneIdentified {
            pattern_id: pattern.id.clone(),
            level_886: zone.level_886,
            entry_lo: zone.entry_zone.lo,
            entry_hi: zone.entry_zone.hi,
            take_profits: zone.take_profits.clone(),
        });

        let mut watch = PatternWatch {
            tracker: TrendlineTracker::new(pattern.direction, self.cfg.trendline_params()),
            machine: ConfirmationMachine::new(&pattern, &zone, self.cfg.confirmation_params()),
        };

        // Replay buffered lower-timeframe history from C onwards.
        let mut confirmed = None;
        let mut expired = false;
        for bar in self.ltf.iter().filter(|b| b.ts >= pattern.c.ts) {
            match watch.on_bar(bar) {
                Transition::Confirmed(req) => {
                    confirmed = Some(req);
                    break;
                }
                Transition::Expired => {
                    expired = true;
                    break;
                }
                Transition::Unchanged => {}
            }
        }

        let id = pattern.id.clone();
        if !self.store.register(pattern, zone, watch) {
            return None;
        }
        if expired {
            self.store.discard(&id);
        } else if confirmed.is_some() {
            self.store.retire_watch(&id);
        }
        confirmed
    }

    /// Feed a closed lower-timeframe bar through every tracker and machine,
    /// act on confirmations, then check exits.
    pub async fn on_lower_bar(&mut self, candle: Candle) -> LowerBarReport {
        let mut report = LowerBarReport::default();
        if self.last_ltf_ts.is_some_and(|ts| candle.ts <= ts) {
            log(
                Level::Debug,
                Domain::Market,
                "stale_bar_dropped",
                obj(&[("timeframe", v_str("ltf")), ("ts", v_num(candle.ts as f64))]),
            );
            return report;
        }
        self.last_ltf_ts = Some(candle.ts);
        self.ltf.push(candle);
        self.positions.mark_price(candle.c);

        let mut entries = Vec::new();
        for (id, watch) in self.store.watches_mut() {
            match watch.on_bar(&candle) {
                Transition::Confirmed(req) => {
                    report.confirmed.push(id.clone());
                    entries.push(req);
                }
                Transition::Expired => report.expired.push(id.clone()),
                Transition::Unchanged => {}
            }
        }
        for id in &report.confirmed {
            self.store.retire_watch(id);
        }
        for id in &report.expired {
            self.store.discard(id);
        }

        if !self.is_live(&candle) {
            for req in &entries {
                self.skip_entry(req);
            }
            return report;
        }
        for req in entries {
            if let Some(id) = self.execute_entry(&req, candle.ts).await {
                report.opened.push(id);
            }
        }

        report.closed = self.positions.on_bar(&candle).await;
        report
    }

    fn skip_entry(&self, req: &EntryRequest) {
        log(
            Level::Info,
            Domain::Confirm,
            "entry_skipped_history",
            obj(&[("pattern_id", v_str(&req.pattern_id)), ("ts", v_num(req.ts as f64))]),
        );
    }

    /// Pull every new closed bar for `timeframe` into the engine. A feed
    /// error is reported and pauses the timeframe until the next call;
    /// every `FEED_RESTART_AFTER` consecutive errors restart the feed.
    pub async fn drain_feed<F>(&mut self, feed: &mut F, timeframe: &Timeframe) -> usize
    where
        F: PriceFeed + ?Sized,
    {
        let mut fed = 0;
        loop {
            match feed.next_bar(timeframe).await {
                Ok(Some(bar)) => {
                    self.feed_failures.remove(&timeframe.role);
                    match timeframe.role {
                        TimeframeRole::Higher => {
                            self.on_higher_bar(bar).await;
                        }
                        TimeframeRole::Lower => {
                            self.on_lower_bar(bar).await;
                        }
                    }
                    fed += 1;
                }
                Ok(None) => return fed,
                Err(e) => {
                    let failures = self.feed_failures.entry(timeframe.role).or_insert(0);
                    *failures += 1;
                    let failures = *failures;
                    log(
                        Level::Warn,
                        Domain::Market,
                        "feed_unavailable",
                        obj(&[
                            ("timeframe", v_str(&timeframe.interval)),
                            ("error", v_str(&e.to_string())),
                            ("consecutive", v_num(failures as f64)),
                        ]),
                    );
                    let message = match e {
                        CoreError::FeedUnavailable(m) => m,
                        other => other.to_string(),
                    };
                    self.notifier
                        .notify(&Notification::Error { context: format!("feed {}", timeframe.interval), message });
                    if failures % FEED_RESTART_AFTER == 0 {
                        feed.restart(timeframe);
                        log(
                            Level::Warn,
                            Domain::Market,
                            "feed_restarted",
                            obj(&[("timeframe", v_str(&timeframe.interval))]),
                        );
                    }
                    return fed;
                }
            }
        }
    }

    async fn execute_entry(&mut self, req: &EntryRequest, now: u64) -> Option<String> {
        match self.positions.open(req, now).await {
            Ok(EntryOutcome::Opened(id)) => Some(id),
            Ok(EntryOutcome::Rejected(why)) => {
                log(
                    Level::Info,
                    Domain::Risk,
                    "entry_rejected",
                    obj(&[("pattern_id", v_str(&req.pattern_id)), ("reason", v_str(why.as_str()))]),
                );
                None
            }
            Err(e) => {
                log(
                    Level::Error,
                    Domain::Exec,
                    "entry_abandoned",
                    obj(&[("pattern_id", v_str(&req.pattern_id)), ("error", v_str(&e.to_string()))]),
                );
                None
            }
        }
    }

    /// Purge expired patterns, zones, machines and retained positions.
    pub fn tick(&mut self, now: u64) -> Result<PurgeReport> {
        let report = self.store.tick(now);
        let purged = self.positions.purge(now);
        if let Err(e) = self.store.archive_positions(&purged) {
            // Keep them in memory so a later tick can archive them.
            self.positions.restore(purged);
            self.notifier.notify(&Notification::Error { context: "archive".to_string(), message: e.to_string() });
            return Err(e);
        }
        Ok(report)
    }

    /// Expire every pending pattern, close all positions and archive.
    pub async fn shutdown(&mut self, reason: ExitReason, now: u64) -> Result<usize> {
        let expired = self.store.expire_all();
        let closed = self.positions.close_all(reason, now).await;
        log(
            Level::Info,
            Domain::System,
            "shutdown",
            obj(&[
                ("reason", v_str(reason.as_str())),
                ("patterns_expired", v_num(expired as f64)),
                ("positions_closed", v_num(closed as f64)),
                ("positions_open", v_num(self.positions.open_count() as f64)),
            ]),
        );
        self.store.flush(self.positions.positions())
    }

    pub fn status(&self, now: u64) -> EngineStatus {
        EngineStatus {
            open_positions: self.positions.open_count(),
            active_patterns: self.store.active_count(),
            daily_pnl: self.positions.daily_pnl(now),
            htf_bars: self.detector.len(),
            ltf_bars: self.ltf.len(),
        }
    }
}
