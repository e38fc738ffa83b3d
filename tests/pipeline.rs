//! End-to-end pipeline tests over replayed bars.
//!
//!   1. Live order        -- HTF pattern, then LTF confirmation and exit
//!   2. Buffered history  -- LTF bars seen before the pattern still confirm
//!   3. Expiry            -- no confirmation before the deadline
//!   4. Shutdown          -- pending patterns expire, positions close
//!   5. Trendline refit   -- a break the machine cannot use restarts the line
//!   6. Warm-up           -- history confirms but never trades
//!   7. Feed outages      -- every failure is reported, repeated ones restart
//!   8. Archive failure   -- purged positions survive a failed write
//!   9. Swing properties  -- extractor output over random walks

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use harmonicfx::confirmation::Signal;
use harmonicfx::engine::{Engine, EngineEvent, FEED_RESTART_AFTER};
use harmonicfx::error::{CoreError, Result};
use harmonicfx::exchange::{Candle, PaperExecution, PriceFeed, ReplayFeed, Timeframe, TimeframeRole};
use harmonicfx::notify::{Notification, Notifier};
use harmonicfx::positions::{ExitReason, PositionStatus};
use harmonicfx::state::Config;
use harmonicfx::storage::TradeArchive;
use harmonicfx::swing::{SwingExtractor, SwingKind};
use harmonicfx::trendline::TrendlineStatus;
use proptest::prelude::*;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const HOUR: u64 = 3600;
const FIVE_MIN: u64 = 300;

#[derive(Default)]
struct Capture(Mutex<Vec<Notification>>);

impl Capture {
    fn kinds(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(|n| n.kind()).collect()
    }

    fn count(&self, kind: &str) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }
}

impl Notifier for Capture {
    fn notify(&self, notification: &Notification) {
        self.0.lock().unwrap().push(notification.clone());
    }
}

fn test_config() -> Config {
    config_with(&[])
}

fn config_with(extra: &[(&str, &str)]) -> Config {
    Config::from_lookup(&|key| match key {
        "SWING_LOOKBACK" => Some("1".to_string()),
        "PAPER_FEE_RATE" => Some("0".to_string()),
        _ => extra.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string()),
    })
    .unwrap()
}

fn candle(ts: u64, h: f64, l: f64, c: f64) -> Candle {
    Candle { ts, o: c, h, l, c, v: 1.0 }
}

/// X=100, A=200, B=138.9, C=169.45, D=123.625 as alternating one-bar swings.
/// D is visible once the seventh bar closes.
fn gartley_htf() -> Vec<Candle> {
    let hl = [
        (150.0, 110.0),
        (120.0, 100.0),
        (200.0, 150.0),
        (160.0, 138.9),
        (169.45, 145.0),
        (150.0, 123.625),
        (140.0, 130.0),
    ];
    hl.iter().enumerate().map(|(i, (h, l))| candle((i as u64 + 1) * HOUR, *h, *l, (h + l) / 2.0)).collect()
}

/// Flat resistance at 185 touched three times, then a close at 195 above the
/// line, the 0.886 level and the zone edge. The last bar reaches the first
/// target.
fn breakout_ltf(start: u64) -> Vec<Candle> {
    let bars = [
        (180.0, 175.0, 178.0),
        (185.0, 178.0, 180.0),
        (182.0, 176.0, 179.0),
        (185.0, 178.0, 180.0),
        (182.0, 176.0, 179.0),
        (185.0, 178.0, 180.0),
        (182.0, 176.0, 180.0),
        (196.0, 181.0, 195.0),
        (203.0, 194.0, 202.0),
    ];
    bars.iter().enumerate().map(|(i, (h, l, c))| candle(start + i as u64 * FIVE_MIN, *h, *l, *c)).collect()
}

fn engine(cfg: Config, notifier: Arc<Capture>) -> (Engine, Arc<PaperExecution>) {
    let paper = Arc::new(PaperExecution::new(10_000.0, 0.0, 0.0));
    let engine = Engine::new(cfg, paper.clone(), paper.clone(), notifier, Some(TradeArchive::in_memory().unwrap()));
    (engine, paper)
}

async fn drain(feed: &mut ReplayFeed, engine: &mut Engine, cfg: &Config, role: TimeframeRole) {
    let tf = match role {
        TimeframeRole::Higher => cfg.htf.clone(),
        TimeframeRole::Lower => cfg.ltf.clone(),
    };
    while let Some(bar) = feed.next_bar(&tf).await.unwrap() {
        let event = match role {
            TimeframeRole::Higher => EngineEvent::HigherBar(bar),
            TimeframeRole::Lower => EngineEvent::LowerBar(bar),
        };
        engine.handle(event).await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// 1. Live order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pattern_confirms_opens_and_takes_profit() {
    let cfg = test_config();
    let capture = Arc::new(Capture::default());
    let (mut engine, paper) = engine(cfg.clone(), capture.clone());

    let htf = gartley_htf();
    let ltf_start = htf.last().unwrap().ts + HOUR + FIVE_MIN;
    let mut feed = ReplayFeed::new()
        .with_bars(TimeframeRole::Higher, htf)
        .with_bars(TimeframeRole::Lower, breakout_ltf(ltf_start));

    drain(&mut feed, &mut engine, &cfg, TimeframeRole::Higher).await;
    let id = format!("gartley-{}", 6 * HOUR);
    assert!(engine.store().pattern(&id).is_some());
    assert!(engine.store().zone(&id).is_some());
    assert_eq!(engine.store().active_count(), 1);

    drain(&mut feed, &mut engine, &cfg, TimeframeRole::Lower).await;
    assert_eq!(feed.remaining(TimeframeRole::Lower), 0);

    let positions = engine.positions().positions();
    assert_eq!(positions.len(), 1);
    let pos = &positions[0];
    assert_eq!(pos.pattern_id, id);
    assert_eq!(pos.entry_price, 195.0);
    assert_eq!(pos.status, PositionStatus::Closed);
    assert_eq!(pos.exit_reason, Some(ExitReason::TakeProfit));
    assert_eq!(pos.exit_price, Some(202.0));
    assert!(pos.pnl > 0.0);
    assert_eq!(paper.open_orders(), 0);

    // 1% of 10k over a stop just below D.
    let stop = 123.625 * (1.0 - 0.0005);
    assert!((pos.size - 100.0 / (195.0 - stop)).abs() < 1e-9);

    assert_eq!(
        capture.kinds(),
        vec!["pattern_detected", "zone_identified", "position_opened", "position_closed"]
    );
    assert_eq!(engine.store().active_count(), 0);

    // Confirmed pattern and zone live until their TTL; the closed position
    // until retention.
    assert!(engine.store().pattern(&id).is_some());
    let closed_at = pos.closed_at.unwrap();
    engine.handle(EngineEvent::Tick(closed_at + cfg.position_retention_secs)).await.unwrap();
    assert!(engine.store().pattern(&id).is_none());
    assert!(engine.positions().positions().is_empty());
}

// ---------------------------------------------------------------------------
// 2. Buffered history
// ---------------------------------------------------------------------------

#[tokio::test]
async fn buffered_lower_bars_confirm_on_registration() {
    let cfg = test_config();
    let capture = Arc::new(Capture::default());
    let (mut engine, _paper) = engine(cfg.clone(), capture.clone());

    let htf = gartley_htf();
    let ltf_start = htf.last().unwrap().ts + HOUR + FIVE_MIN;
    // Up to and including the breakout bar, without the target bar.
    let mut ltf = breakout_ltf(ltf_start);
    ltf.pop();
    for bar in ltf {
        engine.on_lower_bar(bar).await;
    }
    for bar in htf {
        engine.on_higher_bar(bar).await;
    }

    let positions = engine.positions().positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].entry_price, 195.0);
    assert!(positions[0].is_open());
    assert_eq!(engine.store().active_count(), 0);
}

// ---------------------------------------------------------------------------
// 3. Expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unconfirmed_pattern_expires_and_is_purged() {
    let cfg = test_config();
    let capture = Arc::new(Capture::default());
    let (mut engine, _paper) = engine(cfg.clone(), capture.clone());

    let htf = gartley_htf();
    let detected_at = htf.last().unwrap().ts + HOUR;
    for bar in htf {
        engine.on_higher_bar(bar).await;
    }
    let id = format!("gartley-{}", 6 * HOUR);

    // Quiet bar after the deadline.
    let late = detected_at + cfg.zone_ttl_secs;
    let report = engine.on_lower_bar(candle(late, 181.0, 179.0, 180.0)).await;
    assert_eq!(report.expired, vec![id.clone()]);
    assert!(report.opened.is_empty());

    assert!(engine.store().pattern(&id).is_none());
    assert!(engine.store().zone(&id).is_none());
    assert_eq!(engine.store().active_count(), 0);
    // The id stays remembered so a rescan cannot register it again.
    assert!(engine.store().has_seen(&id));
    assert!(capture.kinds().iter().all(|k| *k != "position_opened"));
}

// ---------------------------------------------------------------------------
// 4. Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_closes_positions_and_archives() {
    let cfg = test_config();
    let capture = Arc::new(Capture::default());
    let (mut engine, paper) = engine(cfg.clone(), capture.clone());

    let htf = gartley_htf();
    let ltf_start = htf.last().unwrap().ts + HOUR + FIVE_MIN;
    let mut ltf = breakout_ltf(ltf_start);
    ltf.pop();
    let last_ts = ltf.last().unwrap().ts;
    for bar in htf {
        engine.on_higher_bar(bar).await;
    }
    for bar in ltf {
        engine.on_lower_bar(bar).await;
    }
    assert_eq!(engine.positions().open_count(), 1);

    engine.handle(EngineEvent::Shutdown { reason: ExitReason::Shutdown, now: last_ts + 60 }).await.unwrap();
    assert_eq!(engine.positions().open_count(), 0);
    assert_eq!(paper.open_orders(), 0);
    assert_eq!(engine.positions().positions()[0].exit_reason, Some(ExitReason::Shutdown));

    let status = engine.status(last_ts + 60);
    assert_eq!(status.open_positions, 0);
    assert_eq!(status.active_patterns, 0);
}

// ---------------------------------------------------------------------------
// 5. Trendline refit
// ---------------------------------------------------------------------------

/// Resistance through three pivot highs at `level`, then a close at
/// `break_close` above it.
fn resistance_break(start: u64, level: f64, break_close: f64) -> Vec<Candle> {
    let highs = [level - 2.0, level, level - 3.0, level, level - 3.0, level, level - 3.0];
    let mut bars: Vec<Candle> =
        highs.iter().enumerate().map(|(i, h)| candle(start + i as u64 * FIVE_MIN, *h, h - 5.0, h - 2.0)).collect();
    let ts = start + highs.len() as u64 * FIVE_MIN;
    bars.push(candle(ts, break_close + 1.0, level - 4.0, break_close));
    bars
}

#[tokio::test]
async fn break_before_d_restarts_trendline() {
    let cfg = test_config();
    let capture = Arc::new(Capture::default());
    let (mut engine, _paper) = engine(cfg.clone(), capture.clone());

    let htf = gartley_htf();
    let ltf_start = htf.last().unwrap().ts + HOUR + FIVE_MIN;
    for bar in htf {
        engine.on_higher_bar(bar).await;
    }
    let id = format!("gartley-{}", 6 * HOUR);

    // A complete line and break between C and D cannot count as a signal.
    let mut early = resistance_break(5 * HOUR + FIVE_MIN, 175.0, 180.0);
    early.push(candle(early.last().unwrap().ts + FIVE_MIN, 170.0, 165.0, 168.0));
    assert!(early.last().unwrap().ts < 6 * HOUR);
    for bar in early {
        engine.on_lower_bar(bar).await;
    }
    assert_eq!(engine.store().watch(&id).unwrap().tracker.status(), TrendlineStatus::Building);

    for bar in breakout_ltf(ltf_start) {
        engine.on_lower_bar(bar).await;
    }
    let positions = engine.positions().positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].pattern_id, id);
    assert_eq!(positions[0].entry_price, 195.0);
}

#[tokio::test]
async fn stale_trendline_break_is_refit() {
    let cfg = config_with(&[("CONFIRM_WINDOW_SECS", "3000")]);
    let capture = Arc::new(Capture::default());
    let (mut engine, _paper) = engine(cfg.clone(), capture.clone());

    let htf = gartley_htf();
    let start = htf.last().unwrap().ts + HOUR + FIVE_MIN;
    for bar in htf {
        engine.on_higher_bar(bar).await;
    }
    let id = format!("gartley-{}", 6 * HOUR);

    // Break of a low resistance line: only the trendline signal fires.
    let first = resistance_break(start, 150.0, 160.0);
    let break_ts = first.last().unwrap().ts;
    for bar in first {
        engine.on_lower_bar(bar).await;
    }
    let machine = &engine.store().watch(&id).unwrap().machine;
    assert_eq!(machine.fired_at(Signal::Trendline), Some(break_ts));

    // Level and zone fire far outside the window and push the break out.
    let late = break_ts + 10_000;
    engine.on_lower_bar(candle(late, 193.0, 189.0, 192.0)).await;
    let watch = engine.store().watch(&id).unwrap();
    assert_eq!(watch.machine.fired_at(Signal::Trendline), None);
    assert_eq!(watch.machine.fired_at(Signal::Level), Some(late));
    assert_eq!(watch.tracker.status(), TrendlineStatus::Building);

    // A fresh line and break completes the set.
    for bar in breakout_ltf(late + FIVE_MIN) {
        engine.on_lower_bar(bar).await;
    }
    let positions = engine.positions().positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].entry_price, 195.0);
}

// ---------------------------------------------------------------------------
// 6. Warm-up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_bars_confirm_without_trading() {
    let cfg = test_config();
    let capture = Arc::new(Capture::default());
    let (mut engine, paper) = engine(cfg.clone(), capture.clone());

    let htf = gartley_htf();
    let ltf_start = htf.last().unwrap().ts + HOUR + FIVE_MIN;
    let ltf = breakout_ltf(ltf_start);
    // Only the final target bar is live.
    engine.set_live_from(ltf.last().unwrap().ts);

    for bar in htf {
        engine.on_higher_bar(bar).await;
    }
    let id = format!("gartley-{}", 6 * HOUR);
    let mut confirmed = Vec::new();
    for bar in ltf {
        confirmed.extend(engine.on_lower_bar(bar).await.confirmed);
    }

    assert_eq!(confirmed, vec![id.clone()]);
    assert!(engine.positions().positions().is_empty());
    assert_eq!(paper.open_orders(), 0);
    assert_eq!(capture.count("position_opened"), 0);
    assert_eq!(engine.store().active_count(), 0);
    assert!(engine.store().pattern(&id).is_some());
}

#[tokio::test]
async fn buffered_history_does_not_trade_on_registration() {
    let cfg = test_config();
    let capture = Arc::new(Capture::default());
    let (mut engine, _paper) = engine(cfg.clone(), capture.clone());

    let htf = gartley_htf();
    let ltf_start = htf.last().unwrap().ts + HOUR + FIVE_MIN;
    let mut ltf = breakout_ltf(ltf_start);
    ltf.pop();
    engine.set_live_from(ltf.last().unwrap().ts + FIVE_MIN);
    for bar in ltf {
        engine.on_lower_bar(bar).await;
    }
    for bar in htf {
        engine.on_higher_bar(bar).await;
    }

    assert!(engine.positions().positions().is_empty());
    assert_eq!(engine.store().active_count(), 0);
}

// ---------------------------------------------------------------------------
// 7. Feed outages
// ---------------------------------------------------------------------------

/// Unavailable for the first `down_for` calls, then serves `bars` once.
struct OutageFeed {
    down_for: u32,
    calls: u32,
    restarts: u32,
    bars: Vec<Candle>,
}

#[async_trait]
impl PriceFeed for OutageFeed {
    async fn next_bar(&mut self, _timeframe: &Timeframe) -> Result<Option<Candle>> {
        self.calls += 1;
        if self.calls <= self.down_for {
            return Err(CoreError::FeedUnavailable("503 from venue".to_string()));
        }
        Ok(if self.bars.is_empty() { None } else { Some(self.bars.remove(0)) })
    }

    fn restart(&mut self, _timeframe: &Timeframe) {
        self.restarts += 1;
    }
}

#[tokio::test]
async fn every_feed_failure_is_notified() {
    let cfg = test_config();
    let capture = Arc::new(Capture::default());
    let (mut engine, _paper) = engine(cfg.clone(), capture.clone());
    let mut feed = OutageFeed { down_for: 4, calls: 0, restarts: 0, bars: gartley_htf() };

    for polls in 1..=4u32 {
        assert_eq!(engine.drain_feed(&mut feed, &cfg.htf).await, 0);
        assert_eq!(capture.count("error"), polls as usize);
        assert_eq!(feed.restarts, polls / FEED_RESTART_AFTER);
    }

    assert_eq!(engine.drain_feed(&mut feed, &cfg.htf).await, 7);
    assert_eq!(capture.count("error"), 4);
    assert_eq!(capture.count("pattern_detected"), 1);
    assert_eq!(engine.status(0).htf_bars, 7);
}

// ---------------------------------------------------------------------------
// 8. Archive failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_archive_keeps_purged_positions() {
    let cfg = test_config();
    let capture = Arc::new(Capture::default());
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trades.db");
    let path = path.to_str().unwrap();
    let paper = Arc::new(PaperExecution::new(10_000.0, 0.0, 0.0));
    let archive = TradeArchive::new(path).unwrap();
    let mut engine = Engine::new(cfg.clone(), paper.clone(), paper, capture.clone(), Some(archive));

    let htf = gartley_htf();
    let ltf_start = htf.last().unwrap().ts + HOUR + FIVE_MIN;
    for bar in htf {
        engine.on_higher_bar(bar).await;
    }
    for bar in breakout_ltf(ltf_start) {
        engine.on_lower_bar(bar).await;
    }
    let closed_at = engine.positions().positions()[0].closed_at.unwrap();
    let purge_at = closed_at + cfg.position_retention_secs;

    let admin = rusqlite::Connection::open(path).unwrap();
    admin.execute_batch("ALTER TABLE closed_positions RENAME TO parked;").unwrap();
    assert!(engine.tick(purge_at).is_err());
    assert_eq!(engine.positions().positions().len(), 1);
    assert_eq!(capture.count("error"), 1);

    admin.execute_batch("ALTER TABLE parked RENAME TO closed_positions;").unwrap();
    engine.tick(purge_at + 60).unwrap();
    assert!(engine.positions().positions().is_empty());
    let archived: i64 = admin.query_row("SELECT COUNT(*) FROM closed_positions", [], |row| row.get(0)).unwrap();
    assert_eq!(archived, 1);
}

// ---------------------------------------------------------------------------
// 9. Swing properties
// ---------------------------------------------------------------------------

fn walk(steps: &[f64]) -> Vec<Candle> {
    let mut price = 100.0;
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let open = price;
            price = (price + step).max(1.0);
            let h = open.max(price) + 0.5;
            let l = open.min(price) - 0.5;
            Candle { ts: (i as u64 + 1) * HOUR, o: open, h, l, c: price, v: 1.0 }
        })
        .collect()
}

proptest! {
    #[test]
    fn swing_points_are_local_extremes(
        steps in prop::collection::vec(-5.0f64..5.0, 7..80),
        lookback in 1usize..4,
    ) {
        let bars = walk(&steps);
        prop_assume!(bars.len() >= 2 * lookback + 1);
        let ex = SwingExtractor::new(&bars, lookback).unwrap();
        let mut last_index = None;
        for p in ex.points() {
            prop_assert!(p.index >= lookback && p.index + lookback < bars.len());
            if let Some(prev) = last_index {
                prop_assert!(p.index >= prev);
            }
            last_index = Some(p.index);
            let window = &bars[p.index - lookback..=p.index + lookback];
            match p.kind {
                SwingKind::High => prop_assert!(window.iter().all(|b| b.h <= p.price)),
                SwingKind::Low => prop_assert!(window.iter().all(|b| b.l >= p.price)),
            }
        }
    }

    #[test]
    fn swing_points_are_restartable(steps in prop::collection::vec(-5.0f64..5.0, 3..60)) {
        let bars = walk(&steps);
        let ex = SwingExtractor::new(&bars, 1).unwrap();
        let first: Vec<_> = ex.points().collect();
        let second: Vec<_> = ex.points().collect();
        prop_assert_eq!(first, second);
    }
}
