//! Structured JSON-lines logging.
//!
//! One folder per process run under `LOG_DIR` (default `out/runs`):
//! `manifest.json`, `events.jsonl` for info and above, `trace.jsonl` for
//! debug and trace. Every record is also echoed to stdout.
//!
//! `LOG_LEVEL` sets the minimum level (default `info`), `LOG_DOMAINS` a
//! comma-separated domain allow-list (default `all`). Both are read once.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Levels and domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    const ALL: [Level; 6] = [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error, Level::Fatal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }

    fn is_verbose(&self) -> bool {
        *self <= Level::Debug
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        Level::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,  // bars, feed cursors, outages
    Pattern, // swing points, harmonic matches, store
    Zone,
    Confirm, // signals and confirmation transitions
    Risk,    // admission and sizing
    Exec,    // order placement and closing
    Notify,
    System,
}

impl Domain {
    const ALL: [Domain; 8] = [
        Domain::Market,
        Domain::Pattern,
        Domain::Zone,
        Domain::Confirm,
        Domain::Risk,
        Domain::Exec,
        Domain::Notify,
        Domain::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Pattern => "pattern",
            Domain::Zone => "zone",
            Domain::Confirm => "confirm",
            Domain::Risk => "risk",
            Domain::Exec => "exec",
            Domain::Notify => "notify",
            Domain::System => "system",
        }
    }
}

// =============================================================================
// Filter
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Filter {
    min_level: Level,
    /// `None` lets every domain through.
    domains: Option<Vec<Domain>>,
}

impl Filter {
    fn parse(level: Option<&str>, domains: Option<&str>) -> Self {
        let min_level = level.and_then(|l| l.parse().ok()).unwrap_or(Level::Info);
        let domains = match domains.map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(list) => Some(
                list.split(',')
                    .filter_map(|name| Domain::ALL.into_iter().find(|d| d.as_str() == name.trim()))
                    .collect(),
            ),
        };
        Self { min_level, domains }
    }

    fn allows(&self, level: Level, domain: Domain) -> bool {
        level >= self.min_level && self.domains.as_ref().map_or(true, |ds| ds.contains(&domain))
    }
}

fn filter() -> &'static Filter {
    static FILTER: OnceLock<Filter> = OnceLock::new();
    FILTER.get_or_init(|| {
        Filter::parse(std::env::var("LOG_LEVEL").ok().as_deref(), std::env::var("LOG_DOMAINS").ok().as_deref())
    })
}

// =============================================================================
// Sink
// =============================================================================

type Writer = Mutex<BufWriter<File>>;

struct Sink {
    run_id: String,
    seq: AtomicU64,
    events: Option<Writer>,
    trace: Option<Writer>,
}

impl Sink {
    /// Open the run folder. A folder that cannot be created leaves the sink
    /// on stdout only.
    fn open(base: &Path, run_id: String) -> Self {
        let dir = base.join(&run_id);
        let (events, trace) = match create_dir_all(&dir) {
            Ok(()) => {
                let manifest = json!({
                    "run_id": run_id,
                    "ts": ts_now(),
                    "pid": process::id(),
                    "log_dir": dir.to_string_lossy(),
                });
                if let Err(err) = std::fs::write(dir.join("manifest.json"), manifest.to_string()) {
                    eprintln!("[log] manifest not written: {}", err);
                }
                (Self::writer(dir.join("events.jsonl")), Self::writer(dir.join("trace.jsonl")))
            }
            Err(err) => {
                eprintln!("[log] cannot create {}: {}", dir.display(), err);
                (None, None)
            }
        };
        Self { run_id, seq: AtomicU64::new(0), events, trace }
    }

    fn writer(path: PathBuf) -> Option<Writer> {
        File::create(&path)
            .map(|f| Mutex::new(BufWriter::new(f)))
            .map_err(|err| eprintln!("[log] cannot create {}: {}", path.display(), err))
            .ok()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn write(&self, level: Level, line: &str) {
        let target = if level.is_verbose() { &self.trace } else { &self.events };
        if let Some(Ok(mut w)) = target.as_ref().map(|m| m.lock()) {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
        println!("{}", line);
    }
}

fn sink() -> &'static Sink {
    static SINK: OnceLock<Sink> = OnceLock::new();
    SINK.get_or_init(|| {
        let run_id = std::env::var("RUN_ID").unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        Sink::open(Path::new(&base), run_id)
    })
}

// =============================================================================
// Records
// =============================================================================

const SECRET_KEYS: [&str; 5] = ["api_key", "api_secret", "signature", "X-MBX-APIKEY", "bot_token"];
/// Correlation ids lifted out of `data` to the top level of a record.
const ID_KEYS: [&str; 4] = ["pattern_id", "position_id", "order_id", "symbol"];

#[derive(Debug, Serialize)]
struct Record<'a> {
    ts: String,
    run_id: &'a str,
    seq: u64,
    lvl: &'static str,
    component: &'static str,
    event: &'a str,
    #[serde(flatten)]
    ids: Map<String, Value>,
    data: Map<String, Value>,
}

impl<'a> Record<'a> {
    fn new(run_id: &'a str, seq: u64, level: Level, domain: Domain, event: &'a str, mut data: Map<String, Value>) -> Self {
        for key in SECRET_KEYS {
            if let Some(v) = data.get_mut(key) {
                *v = Value::String("[REDACTED]".to_string());
            }
        }
        let ids = ID_KEYS
            .iter()
            .filter_map(|k| data.remove(*k).map(|v| (k.to_string(), v)))
            .collect();
        Self {
            ts: ts_now(),
            run_id,
            seq,
            lvl: level.as_str(),
            component: domain.as_str(),
            event,
            ids,
            data,
        }
    }
}

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit one structured record if `level` and `domain` pass the filter.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if !filter().allows(level, domain) {
        return;
    }
    let sink = sink();
    let record = Record::new(&sink.run_id, sink.next_seq(), level, domain, event, fields);
    match serde_json::to_string(&record) {
        Ok(line) => sink.write(level, &line),
        Err(err) => eprintln!("[log] unserializable record {}: {}", event, err),
    }
}

// =============================================================================
// Domain helpers
// =============================================================================

pub fn log_candle(timeframe: &str, ts: u64, o: f64, h: f64, l: f64, c: f64) {
    log(
        Level::Trace,
        Domain::Market,
        "candle",
        obj(&[
            ("timeframe", v_str(timeframe)),
            ("candle_ts", json!(ts)),
            ("o", v_num(o)),
            ("h", v_num(h)),
            ("l", v_num(l)),
            ("c", v_num(c)),
        ]),
    );
}

pub fn log_pattern(pattern_id: &str, variant: &str, direction: &str, confidence: f64, d_price: f64) {
    log(
        Level::Info,
        Domain::Pattern,
        "pattern_detected",
        obj(&[
            ("pattern_id", v_str(pattern_id)),
            ("variant", v_str(variant)),
            ("direction", v_str(direction)),
            ("confidence", v_num(confidence)),
            ("d_price", v_num(d_price)),
        ]),
    );
}

/// A candidate dropped somewhere between matching and registration.
pub fn log_discard(stage: &str, reason: &str) {
    log(Level::Debug, Domain::Pattern, "candidate_discarded", obj(&[("stage", v_str(stage)), ("reason", v_str(reason))]));
}

pub fn log_signal(pattern_id: &str, signal: &str, ts: u64, price: f64) {
    log(
        Level::Info,
        Domain::Confirm,
        "signal_fired",
        obj(&[
            ("pattern_id", v_str(pattern_id)),
            ("signal", v_str(signal)),
            ("signal_ts", json!(ts)),
            ("price", v_num(price)),
        ]),
    );
}

pub fn log_risk_check(check: &str, result: &str, value: f64, threshold: f64) {
    log(
        Level::Debug,
        Domain::Risk,
        "guard",
        obj(&[
            ("check", v_str(check)),
            ("result", v_str(result)),
            ("value", v_num(value)),
            ("threshold", v_num(threshold)),
        ]),
    );
}

pub fn log_order_submit(pattern_id: &str, side: &str, size: f64, stop_loss: f64) {
    log(
        Level::Info,
        Domain::Exec,
        "order_submit",
        obj(&[
            ("pattern_id", v_str(pattern_id)),
            ("side", v_str(side)),
            ("size", v_num(size)),
            ("stop_loss", v_num(stop_loss)),
        ]),
    );
}

pub fn log_exit(position_id: &str, reason: &str, exit_price: f64, fee: f64, realized_pnl: f64) {
    log(
        Level::Info,
        Domain::Exec,
        "position_closed",
        obj(&[
            ("position_id", v_str(position_id)),
            ("reason", v_str(reason)),
            ("exit_price", v_num(exit_price)),
            ("fee", v_num(fee)),
            ("realized_pnl", v_num(realized_pnl)),
        ]),
    );
}

// =============================================================================
// Field builders
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}
