use std::collections::HashMap;
use std::str::FromStr;

use crate::confirmation::{ConfirmationMachine, ConfirmationParams, ConfirmationStatus, Signal, Transition};
use crate::error::{CoreError, Result};
use crate::exchange::{Candle, Timeframe, TimeframeRole};
use crate::harmonic::{BandTable, HarmonicVariant, Pattern, RatioBands};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::positions::{Position, PositionParams};
use crate::storage::TradeArchive;
use crate::trendline::{TrendlineParams, TrendlineStatus, TrendlineTracker};
use crate::zones::{Zone, ZoneParams};

#[derive(Clone, Debug)]
pub struct Config {
    pub symbol: String,
    pub quote_asset: String,
    pub htf: Timeframe,
    pub ltf: Timeframe,
    pub swing_lookback: usize,
    pub htf_window: usize,
    pub ltf_window: usize,
    pub min_confidence: f64,
    pub bands: BandTable,
    pub zone_buffer: f64,
    pub trendline_tolerance: f64,
    pub trendline_min_touches: usize,
    pub pattern_ttl_secs: u64,
    pub zone_ttl_secs: u64,
    pub confirm_window_secs: u64,
    pub position_retention_secs: u64,
    /// Percent of equity risked per trade, 1.0 = 1%.
    pub risk_percentage: f64,
    pub max_positions: usize,
    pub stop_buffer_pct: f64,
    pub io_timeout_secs: u64,
    pub max_exec_failures: u32,
    pub exec_cooldown_secs: u64,
    pub poll_secs: u64,
    pub status_every_secs: u64,
    pub kline_history: u32,
    pub paper_equity: f64,
    pub paper_fee_rate: f64,
    pub paper_slippage: f64,
    pub sqlite_path: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub binance_base: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

fn parse_or<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Configuration(format!("{}: cannot parse '{}'", key, raw))),
    }
}

fn non_empty(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing keys take defaults; a
    /// present but unparsable value is an error.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let htf = Timeframe::parse(TimeframeRole::Higher, &non_empty(lookup, "HTF").unwrap_or_else(|| "1h".into()))?;
        let ltf = Timeframe::parse(TimeframeRole::Lower, &non_empty(lookup, "LTF").unwrap_or_else(|| "5m".into()))?;

        let mut bands = BandTable::default();
        for variant in HarmonicVariant::ALL {
            let key = format!("BANDS_{}", variant.as_str().to_uppercase());
            if let Some(raw) = non_empty(lookup, &key) {
                bands.set(variant, RatioBands::parse(&raw)?);
            }
        }

        let cfg = Self {
            symbol: non_empty(lookup, "SYMBOL").unwrap_or_else(|| "BTCUSDT".to_string()),
            quote_asset: non_empty(lookup, "QUOTE_ASSET").unwrap_or_else(|| "USDT".to_string()),
            htf,
            ltf,
            swing_lookback: parse_or(lookup, "SWING_LOOKBACK", 5)?,
            htf_window: parse_or(lookup, "HTF_WINDOW", 200)?,
            ltf_window: parse_or(lookup, "LTF_WINDOW", 300)?,
            min_confidence: parse_or(lookup, "MIN_CONFIDENCE", 0.6)?,
            bands,
            zone_buffer: parse_or(lookup, "ZONE_BUFFER", 0.02)?,
            trendline_tolerance: parse_or(lookup, "TRENDLINE_TOLERANCE", 0.002)?,
            trendline_min_touches: parse_or(lookup, "TRENDLINE_MIN_TOUCHES", 3)?,
            pattern_ttl_secs: parse_or(lookup, "PATTERN_TTL_SECS", 172_800)?,
            zone_ttl_secs: parse_or(lookup, "ZONE_TTL_SECS", 86_400)?,
            confirm_window_secs: parse_or(lookup, "CONFIRM_WINDOW_SECS", 86_400)?,
            position_retention_secs: parse_or(lookup, "POSITION_RETENTION_SECS", 604_800)?,
            risk_percentage: parse_or(lookup, "RISK_PERCENTAGE", 1.0)?,
            max_positions: parse_or(lookup, "MAX_POSITIONS", 3)?,
            stop_buffer_pct: parse_or(lookup, "STOP_BUFFER_PCT", 0.0005)?,
            io_timeout_secs: parse_or(lookup, "IO_TIMEOUT_SECS", 10)?,
            max_exec_failures: parse_or(lookup, "MAX_EXEC_FAILURES", 5)?,
            exec_cooldown_secs: parse_or(lookup, "EXEC_COOLDOWN_SECS", 900)?,
            poll_secs: parse_or(lookup, "POLL_SECS", 10)?,
            status_every_secs: parse_or(lookup, "STATUS_EVERY_SECS", 14_400)?,
            kline_history: parse_or(lookup, "KLINE_HISTORY", 500)?,
            paper_equity: parse_or(lookup, "PAPER_EQUITY", 10_000.0)?,
            paper_fee_rate: parse_or(lookup, "PAPER_FEE_RATE", 0.001)?,
            paper_slippage: parse_or(lookup, "PAPER_SLIPPAGE", 0.0)?,
            sqlite_path: non_empty(lookup, "SQLITE_PATH"),
            api_key: non_empty(lookup, "API_KEY"),
            api_secret: non_empty(lookup, "API_SECRET"),
            binance_base: non_empty(lookup, "BINANCE_BASE").unwrap_or_else(|| "https://api.binance.com".to_string()),
            telegram_bot_token: non_empty(lookup, "TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: non_empty(lookup, "TELEGRAM_CHAT_ID"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(CoreError::Configuration(msg.to_string()));
        if self.swing_lookback == 0 {
            return fail("SWING_LOOKBACK must be >= 1");
        }
        if self.htf_window < 2 * self.swing_lookback + 1 {
            return fail("HTF_WINDOW must hold at least one swing window");
        }
        if self.ltf_window < 3 {
            return fail("LTF_WINDOW must be >= 3");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return fail("MIN_CONFIDENCE must be within [0, 1]");
        }
        if !(self.zone_buffer >= 0.0) || !(self.trendline_tolerance >= 0.0) || !(self.stop_buffer_pct >= 0.0) {
            return fail("ZONE_BUFFER, TRENDLINE_TOLERANCE and STOP_BUFFER_PCT must be >= 0");
        }
        if self.trendline_min_touches < 2 {
            return fail("TRENDLINE_MIN_TOUCHES must be >= 2");
        }
        if self.pattern_ttl_secs == 0 || self.zone_ttl_secs == 0 {
            return fail("PATTERN_TTL_SECS and ZONE_TTL_SECS must be > 0");
        }
        if !(self.risk_percentage > 0.0 && self.risk_percentage <= 100.0) {
            return fail("RISK_PERCENTAGE must be within (0, 100]");
        }
        if self.max_positions == 0 {
            return fail("MAX_POSITIONS must be >= 1");
        }
        if self.io_timeout_secs == 0 || self.poll_secs == 0 {
            return fail("IO_TIMEOUT_SECS and POLL_SECS must be > 0");
        }
        if self.htf.secs <= self.ltf.secs {
            return fail("HTF must be longer than LTF");
        }
        if self.api_key.is_some() != self.api_secret.is_some() {
            return fail("API_KEY and API_SECRET must be set together");
        }
        if self.telegram_bot_token.is_some() != self.telegram_chat_id.is_some() {
            return fail("TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set together");
        }
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }

    pub fn zone_params(&self) -> ZoneParams {
        ZoneParams { zone_buffer: self.zone_buffer }
    }

    pub fn trendline_params(&self) -> TrendlineParams {
        TrendlineParams { tolerance: self.trendline_tolerance, min_touches: self.trendline_min_touches }
    }

    pub fn confirmation_params(&self) -> ConfirmationParams {
        ConfirmationParams {
            pattern_ttl: self.pattern_ttl_secs,
            zone_ttl: self.zone_ttl_secs,
            confirm_window: self.confirm_window_secs,
            stop_buffer_pct: self.stop_buffer_pct,
        }
    }

    pub fn position_params(&self) -> PositionParams {
        PositionParams {
            risk_pct: self.risk_percentage,
            max_positions: self.max_positions,
            retention_secs: self.position_retention_secs,
            max_exec_failures: self.max_exec_failures,
            exec_cooldown_secs: self.exec_cooldown_secs,
            io_timeout_secs: self.io_timeout_secs,
        }
    }
}

/// Fixed-capacity history; the oldest value is overwritten once full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T: Copy> {
    buf: Vec<T>,
    cap: usize,
    idx: usize,
}

impl<T: Copy> RingBuffer<T> {
    pub fn new(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap), cap: cap.max(1), idx: 0 }
    }

    /// Append a value, returning the one it displaced.
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.buf.len() < self.cap {
            self.buf.push(value);
            return None;
        }
        let old = self.buf[self.idx];
        self.buf[self.idx] = value;
        self.idx = (self.idx + 1) % self.cap;
        Some(old)
    }

    pub fn last(&self) -> Option<T> {
        if self.buf.len() < self.cap {
            return self.buf.last().copied();
        }
        let i = if self.idx == 0 { self.cap - 1 } else { self.idx - 1 };
        Some(self.buf[i])
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.buf.split_at(self.idx);
        older.iter().chain(newer.iter())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().copied().collect()
    }
}

/// Per-pattern lower-timeframe state.
pub struct PatternWatch {
    pub tracker: TrendlineTracker,
    pub machine: ConfirmationMachine,
}

impl PatternWatch {
    /// Run one lower-timeframe bar through the tracker and the machine.
    /// A break the machine holds no signal for (before D, or dropped as
    /// stale) restarts the line from later bars.
    pub fn on_bar(&mut self, bar: &Candle) -> Transition {
        let events = self.tracker.on_bar(bar);
        let transition = self.machine.on_bar(bar, &events);
        if matches!(transition, Transition::Unchanged)
            && self.tracker.status() == TrendlineStatus::Broken
            && self.machine.fired_at(Signal::Trendline).is_none()
        {
            self.tracker.reset();
            log(
                Level::Debug,
                Domain::Confirm,
                "trendline_reset",
                obj(&[("pattern_id", v_str(self.machine.pattern_id())), ("ts", v_num(bar.ts as f64))]),
            );
        }
        transition
    }
}

/// What `Store::tick` removed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PurgeReport {
    pub patterns: Vec<String>,
    pub zones: Vec<String>,
    pub watches: Vec<String>,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.zones.is_empty() && self.watches.is_empty()
    }
}

/// Registry of live patterns, their zones and confirmation state.
pub struct Store {
    pattern_ttl: u64,
    zone_ttl: u64,
    patterns: HashMap<String, Pattern>,
    zones: HashMap<String, Zone>,
    watches: HashMap<String, PatternWatch>,
    /// Ids already processed, with their detection time.
    seen: HashMap<String, u64>,
    archive: Option<TradeArchive>,
}

impl Store {
    pub fn new(pattern_ttl: u64, zone_ttl: u64) -> Self {
        Self {
            pattern_ttl,
            zone_ttl,
            patterns: HashMap::new(),
            zones: HashMap::new(),
            watches: HashMap::new(),
            seen: HashMap::new(),
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: TradeArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn has_seen(&self, pattern_id: &str) -> bool {
        self.seen.contains_key(pattern_id)
    }

    /// Register a new pattern with its zone and watchers. A pattern id that
    /// was already registered is rejected.
    pub fn register(&mut self, pattern: Pattern, zone: Zone, watch: PatternWatch) -> bool {
        if self.seen.contains_key(&pattern.id) {
            return false;
        }
        let id = pattern.id.clone();
        self.seen.insert(id.clone(), pattern.detected_at);
        self.zones.insert(id.clone(), zone);
        self.watches.insert(id.clone(), watch);
        self.patterns.insert(id, pattern);
        true
    }

    pub fn pattern(&self, id: &str) -> Option<&Pattern> {
        self.patterns.get(id)
    }

    pub fn zone(&self, id: &str) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn watch(&self, id: &str) -> Option<&PatternWatch> {
        self.watches.get(id)
    }

    pub fn watches_mut(&mut self) -> impl Iterator<Item = (&String, &mut PatternWatch)> {
        self.watches.iter_mut()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Patterns still awaiting confirmation.
    pub fn active_count(&self) -> usize {
        self.watches.values().filter(|w| !w.machine.is_terminal()).count()
    }

    /// Drop a pattern together with its zone and watchers.
    pub fn discard(&mut self, id: &str) {
        self.patterns.remove(id);
        self.zones.remove(id);
        self.watches.remove(id);
    }

    /// Remove the watchers of a confirmed pattern; pattern and zone stay until
    /// their TTL.
    pub fn retire_watch(&mut self, id: &str) {
        self.watches.remove(id);
    }

    /// Purge everything whose lifetime ended at `now`.
    pub fn tick(&mut self, now: u64) -> PurgeReport {
        let mut report = PurgeReport::default();

        // An expired pattern leaves together with its zone and watchers.
        let expired: Vec<String> = self
            .watches
            .iter_mut()
            .filter_map(|(id, w)| {
                w.machine.expire_if_due(now);
                (w.machine.status() == ConfirmationStatus::Expired).then(|| id.clone())
            })
            .collect();
        for id in expired {
            if self.zones.contains_key(&id) {
                report.zones.push(id.clone());
            }
            if self.patterns.contains_key(&id) {
                report.patterns.push(id.clone());
            }
            report.watches.push(id.clone());
            self.discard(&id);
        }

        let pattern_ttl = self.pattern_ttl;
        self.patterns.retain(|id, p| {
            let keep = now < p.detected_at.saturating_add(pattern_ttl);
            if !keep {
                report.patterns.push(id.clone());
            }
            keep
        });

        let zone_ttl = self.zone_ttl;
        let patterns = &self.patterns;
        let watches = &self.watches;
        self.zones.retain(|id, z| {
            let confirmed = watches.get(id).is_some_and(|w| w.machine.status() == ConfirmationStatus::Confirmed)
                || (patterns.contains_key(id) && !watches.contains_key(id));
            let expired = now >= z.built_at.saturating_add(zone_ttl) && !confirmed;
            let keep = patterns.contains_key(id) && !expired;
            if !keep {
                report.zones.push(id.clone());
            }
            keep
        });

        let patterns = &self.patterns;
        self.watches.retain(|id, w| {
            let keep = patterns.contains_key(id) && !w.machine.is_terminal();
            if !keep {
                report.watches.push(id.clone());
            }
            keep
        });

        // Remember ids long enough that a rescan of the same swing points
        // cannot register them again.
        let horizon = pattern_ttl.saturating_mul(2);
        self.seen.retain(|_, detected_at| now < detected_at.saturating_add(horizon));

        if !report.is_empty() {
            log(
                Level::Debug,
                Domain::Pattern,
                "store_purged",
                obj(&[
                    ("patterns", v_num(report.patterns.len() as f64)),
                    ("zones", v_num(report.zones.len() as f64)),
                    ("watches", v_num(report.watches.len() as f64)),
                ]),
            );
        }
        report
    }

    /// Force-expire every machine still awaiting confirmation.
    pub fn expire_all(&mut self) -> usize {
        self.watches.values_mut().map(|w| w.machine.force_expire()).filter(|expired| *expired).count()
    }

    /// Archive closed positions to SQLite when an archive is configured.
    pub fn archive_positions(&mut self, positions: &[Position]) -> Result<usize> {
        match self.archive.as_mut() {
            Some(archive) => archive.archive(positions),
            None => Ok(0),
        }
    }

    /// Teardown: archive closed positions and drop all pattern state.
    pub fn flush(&mut self, positions: &[Position]) -> Result<usize> {
        let written = self.archive_positions(positions)?;
        let dropped = self.patterns.len();
        self.patterns.clear();
        self.zones.clear();
        self.watches.clear();
        log(
            Level::Info,
            Domain::System,
            "store_flushed",
            obj(&[
                ("archived", v_num(written as f64)),
                ("patterns_dropped", v_num(dropped as f64)),
                ("archive", v_str(if self.archive.is_some() { "sqlite" } else { "none" })),
            ]),
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Direction;
    use crate::harmonic::LegRatios;
    use crate::swing::{SwingKind, SwingPoint};
    use crate::zones::build_zone;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    fn pattern(d_ts: u64, detected_at: u64) -> Pattern {
        let prices = [100.0, 200.0, 150.0, 180.0, 110.0];
        let kinds = [SwingKind::Low, SwingKind::High];
        let p = |i: usize| SwingPoint { index: i, ts: d_ts - (4 - i as u64) * 100, price: prices[i], kind: kinds[i % 2] };
        Pattern {
            id: format!("gartley-{}", d_ts),
            x: p(0),
            a: p(1),
            b: p(2),
            c: p(3),
            d: p(4),
            variant: HarmonicVariant::Gartley,
            direction: Direction::Bullish,
            confidence: 0.7,
            ratios: LegRatios { ab_xa: 0.0, bc_ab: 0.0, cd_bc: 0.0, ad_xa: 0.0 },
            detected_at,
        }
    }

    fn register(store: &mut Store, d_ts: u64, now: u64) -> bool {
        let p = pattern(d_ts, now);
        let zone = build_zone(&p, &ZoneParams::default(), now).unwrap();
        let params = ConfirmationParams { pattern_ttl: 1000, zone_ttl: 500, ..Default::default() };
        let watch = PatternWatch {
            tracker: TrendlineTracker::new(p.direction, TrendlineParams::default()),
            machine: ConfirmationMachine::new(&p, &zone, params),
        };
        store.register(p, zone, watch)
    }

    #[test]
    fn test_config_defaults() {
        let cfg = Config::from_lookup(&lookup(&[])).unwrap();
        assert_eq!(cfg.swing_lookback, 5);
        assert_eq!(cfg.htf.secs, 3600);
        assert_eq!(cfg.ltf.secs, 300);
        assert_eq!(cfg.max_positions, 3);
        assert_eq!(cfg.pattern_ttl_secs, 172_800);
        assert_eq!(cfg.bands, BandTable::default());
        assert!(!cfg.has_credentials());
    }

    #[test]
    fn test_config_overrides_and_errors() {
        let cfg = Config::from_lookup(&lookup(&[
            ("MAX_POSITIONS", "5"),
            ("BANDS_BAT", "0.4,0.5;0.4,0.9;1.6,2.6;0.85,0.9"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_positions, 5);
        assert_eq!(cfg.bands.get(HarmonicVariant::Bat).ad_xa.hi, 0.9);

        let bad = Config::from_lookup(&lookup(&[("MAX_POSITIONS", "three")]));
        assert!(matches!(bad, Err(CoreError::Configuration(_))));
        let bad = Config::from_lookup(&lookup(&[("MIN_CONFIDENCE", "1.5")]));
        assert!(matches!(bad, Err(CoreError::Configuration(_))));
        let bad = Config::from_lookup(&lookup(&[("API_KEY", "k")]));
        assert!(matches!(bad, Err(CoreError::Configuration(_))));
        let bad = Config::from_lookup(&lookup(&[("HTF", "5m"), ("LTF", "1h")]));
        assert!(matches!(bad, Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_ring_buffer_order() {
        let mut rb = RingBuffer::new(3);
        assert_eq!(rb.last(), None);
        assert_eq!(rb.push(1), None);
        rb.push(2);
        rb.push(3);
        assert_eq!(rb.push(4), Some(1));
        assert_eq!(rb.to_vec(), vec![2, 3, 4]);
        assert_eq!(rb.last(), Some(4));
        rb.push(5);
        rb.push(6);
        assert_eq!(rb.to_vec(), vec![4, 5, 6]);
        assert_eq!(rb.len(), 3);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut store = Store::new(1000, 500);
        assert!(register(&mut store, 5000, 5000));
        assert!(!register(&mut store, 5000, 5100));
        assert_eq!(store.pattern_count(), 1);
        // Still rejected after the pattern itself has been purged.
        store.tick(6000);
        assert_eq!(store.pattern_count(), 0);
        assert!(!register(&mut store, 5000, 6000));
    }

    #[test]
    fn test_zone_and_pattern_ttls() {
        let mut store = Store::new(1000, 500);
        register(&mut store, 5000, 5000);
        store.tick(5499);
        assert_eq!(store.zone_count(), 1);
        assert_eq!(store.active_count(), 1);

        // Expiry discards pattern, zone and watchers together.
        let report = store.tick(5500);
        assert_eq!(report.patterns, vec!["gartley-5000".to_string()]);
        assert_eq!(report.zones, vec!["gartley-5000".to_string()]);
        assert_eq!(report.watches, vec!["gartley-5000".to_string()]);
        assert_eq!(store.pattern_count(), 0);
        assert_eq!(store.zone_count(), 0);
        assert!(store.has_seen("gartley-5000"));
    }

    #[test]
    fn test_confirmed_pattern_kept_until_pattern_ttl() {
        let mut store = Store::new(1000, 500);
        register(&mut store, 5000, 5000);
        store.retire_watch("gartley-5000");

        let report = store.tick(5500);
        assert!(report.patterns.is_empty());
        assert_eq!(store.zone_count(), 1);
        assert_eq!(store.pattern_count(), 1);

        store.tick(5999);
        assert_eq!(store.pattern_count(), 1);
        let report = store.tick(6000);
        assert_eq!(report.patterns, vec!["gartley-5000".to_string()]);
        assert_eq!(report.zones, vec!["gartley-5000".to_string()]);
        assert_eq!(store.pattern_count(), 0);
    }

    #[test]
    fn test_expire_all_and_flush() {
        let mut store = Store::new(1000, 500).with_archive(TradeArchive::in_memory().unwrap());
        register(&mut store, 5000, 5000);
        register(&mut store, 5100, 5100);
        assert_eq!(store.expire_all(), 2);
        assert_eq!(store.active_count(), 0);
        assert_eq!(store.flush(&[]).unwrap(), 0);
        assert_eq!(store.pattern_count(), 0);
    }
}
