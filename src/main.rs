use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use harmonicfx::engine::Engine;
use harmonicfx::exchange::{
    Account, BinanceClient, BinanceExecution, BinanceFeed, Execution, ExchangeKind, PaperExecution,
};
use harmonicfx::logging::{log, obj, v_num, v_str, Domain, Level};
use harmonicfx::notify::{FanoutNotifier, LogNotifier, Notifier, TelegramNotifier};
use harmonicfx::positions::ExitReason;
use harmonicfx::state::Config;
use harmonicfx::storage::TradeArchive;

fn now_ts() -> u64 {
    Utc::now().timestamp() as u64
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            log(Level::Fatal, Domain::System, "config_invalid", obj(&[("error", v_str(&e.to_string()))]));
            return Err(e).context("loading configuration");
        }
    };

    let mut fanout = FanoutNotifier::new().with(Box::new(LogNotifier));
    if let (Some(token), Some(chat)) = (&cfg.telegram_bot_token, &cfg.telegram_chat_id) {
        fanout = fanout.with(Box::new(TelegramNotifier::new(token.clone(), chat.clone())));
    }
    let notifier: Arc<dyn Notifier + Send + Sync> = Arc::new(fanout);

    let client = BinanceClient::new(&cfg)?;
    let kind = ExchangeKind::from_env(cfg.has_credentials());
    let (execution, account): (Arc<dyn Execution + Send + Sync>, Arc<dyn Account + Send + Sync>) = match kind {
        ExchangeKind::Binance => (Arc::new(BinanceExecution::new(client.clone())), Arc::new(client.clone())),
        ExchangeKind::Paper => {
            let paper = Arc::new(PaperExecution::new(cfg.paper_equity, cfg.paper_fee_rate, cfg.paper_slippage));
            (paper.clone(), paper)
        }
    };
    let archive = match &cfg.sqlite_path {
        Some(path) => Some(TradeArchive::new(path).with_context(|| format!("opening archive {}", path))?),
        None => None,
    };

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("symbol", v_str(&cfg.symbol)),
            ("htf", v_str(&cfg.htf.interval)),
            ("ltf", v_str(&cfg.ltf.interval)),
            ("execution", v_str(if kind == ExchangeKind::Binance { "binance" } else { "paper" })),
            ("max_positions", v_num(cfg.max_positions as f64)),
            ("risk_percentage", v_num(cfg.risk_percentage)),
        ]),
    );

    let mut feed = BinanceFeed::new(client, cfg.kline_history);
    let htf = cfg.htf.clone();
    let ltf = cfg.ltf.clone();
    let mut poll = interval(Duration::from_secs(cfg.poll_secs));
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut status = interval(Duration::from_secs(cfg.status_every_secs.max(1)));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut engine = Engine::new(cfg, execution, account, notifier.clone(), archive);
    // The first poll replays kline history; only bars from here on trade.
    engine.set_live_from(now_ts().saturating_sub(ltf.secs));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                engine.drain_feed(&mut feed, &htf).await;
                engine.drain_feed(&mut feed, &ltf).await;
                if let Err(e) = engine.tick(now_ts()) {
                    log(Level::Error, Domain::System, "tick_failed", obj(&[("error", v_str(&e.to_string()))]));
                }
            }
            _ = status.tick() => {
                let snapshot = engine.status(now_ts());
                notifier.notify(&snapshot.to_notification());
            }
            _ = &mut shutdown => {
                log(Level::Warn, Domain::System, "interrupt", obj(&[]));
                break;
            }
        }
    }

    let archived = engine.shutdown(ExitReason::Shutdown, now_ts()).await?;
    let snapshot = engine.status(now_ts());
    notifier.notify(&snapshot.to_notification());
    log(
        Level::Info,
        Domain::System,
        "stopped",
        obj(&[("archived", v_num(archived as f64)), ("open_positions", v_num(snapshot.open_positions as f64))]),
    );
    Ok(())
}
