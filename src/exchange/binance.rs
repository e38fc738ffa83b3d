use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::exchange::retry::is_retryable_http_error;
use crate::exchange::signing::signed_query;
use crate::exchange::{
    Account, Candle, Direction, Execution, ExitResult, OrderResult, PriceFeed, Timeframe,
    TimeframeRole,
};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::state::Config;

/// Shared REST plumbing for the Binance spot API.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base: String,
    symbol: String,
    quote_asset: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl BinanceClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.io_timeout_secs))
            .build()
            .map_err(|e| CoreError::Configuration(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base: cfg.binance_base.clone(),
            symbol: cfg.symbol.clone(),
            quote_asset: cfg.quote_asset.clone(),
            api_key: cfg.api_key.clone(),
            api_secret: cfg.api_secret.clone(),
        })
    }

    fn timestamp_ms() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (&self.api_key, &self.api_secret) {
            (Some(k), Some(s)) => Ok((k.as_str(), s.as_str())),
            _ => Err(CoreError::Configuration("missing API_KEY/API_SECRET".to_string())),
        }
    }

    async fn klines(&self, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base, self.symbol, interval, limit
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::FeedUnavailable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CoreError::FeedUnavailable(format!("klines http {}", status.as_u16())));
        }
        let rows: Vec<Vec<serde_json::Value>> = resp
            .json()
            .await
            .map_err(|e| CoreError::FeedUnavailable(e.to_string()))?;

        let now_ms = Self::timestamp_ms();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            // Skip the still-forming bar.
            let close_time = row.get(6).and_then(|v| v.as_u64()).unwrap_or(u64::MAX);
            if close_time >= now_ms {
                continue;
            }
            out.push(parse_kline(&row)?);
        }
        Ok(out)
    }

    async fn market_order(&self, side: &str, qty: f64) -> Result<OrderResult> {
        let (api_key, api_secret) = self.credentials()?;
        let query = format!("symbol={}&side={}&type=MARKET&quantity={:.8}", self.symbol, side, qty);
        let signed = signed_query(&query, api_secret, Self::timestamp_ms())?;
        let url = format!("{}/api/v3/order?{}", self.base, signed);

        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await
            .map_err(|e| CoreError::Execution(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| CoreError::Execution(e.to_string()))?;

        if !status.is_success() {
            let err: BinanceError = serde_json::from_str(&body)
                .unwrap_or(BinanceError { code: -1, msg: body.clone() });
            let msg = format!("Binance order failed: {} - {}", err.code, err.msg);
            // 4xx other than rate limits will not succeed on retry.
            return Err(if is_retryable_http_error(status.as_u16()) {
                CoreError::Execution(msg)
            } else {
                CoreError::Configuration(msg)
            });
        }

        let order: BinanceOrderResponse =
            serde_json::from_str(&body).map_err(|e| CoreError::Execution(e.to_string()))?;

        let (total_qty, total_cost, total_fee) = order.fills.iter().fold(
            (0.0f64, 0.0f64, 0.0f64),
            |(q, c, f), fill| {
                let fq: f64 = fill.qty.parse().unwrap_or(0.0);
                let fp: f64 = fill.price.parse().unwrap_or(0.0);
                let fc: f64 = fill.commission.parse().unwrap_or(0.0);
                (q + fq, c + fq * fp, f + fc)
            },
        );
        if total_qty <= 0.0 {
            return Err(CoreError::Execution(format!("order {} returned no fills", order.order_id)));
        }

        Ok(OrderResult {
            order_id: order.order_id.to_string(),
            filled_price: total_cost / total_qty,
            fee: total_fee,
        })
    }
}

fn parse_kline(row: &[serde_json::Value]) -> Result<Candle> {
    let num = |i: usize| -> Result<f64> {
        row.get(i)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| CoreError::FeedUnavailable(format!("malformed kline field {}", i)))
    };
    let open_ms = row
        .first()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| CoreError::FeedUnavailable("malformed kline open time".to_string()))?;
    Ok(Candle { ts: open_ms / 1000, o: num(1)?, h: num(2)?, l: num(3)?, c: num(4)?, v: num(5)? })
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct BinanceOrderResponse {
    order_id: u64,
    #[serde(default)]
    fills: Vec<BinanceFill>,
}

#[derive(Deserialize, Debug)]
struct BinanceFill {
    price: String,
    qty: String,
    commission: String,
}

#[derive(Deserialize, Debug)]
struct BinanceError {
    code: i64,
    msg: String,
}

#[derive(Deserialize, Debug)]
struct BinanceAccount {
    balances: Vec<BinanceBalance>,
}

#[derive(Deserialize, Debug)]
struct BinanceBalance {
    asset: String,
    free: String,
    locked: String,
}

// =============================================================================
// Price feed
// =============================================================================

/// Closed-bar feed with one cursor per timeframe role.
pub struct BinanceFeed {
    client: BinanceClient,
    history_limit: u32,
    cursors: HashMap<TimeframeRole, u64>,
    queues: HashMap<TimeframeRole, VecDeque<Candle>>,
}

impl BinanceFeed {
    pub fn new(client: BinanceClient, history_limit: u32) -> Self {
        Self { client, history_limit, cursors: HashMap::new(), queues: HashMap::new() }
    }
}

#[async_trait]
impl PriceFeed for BinanceFeed {
    async fn next_bar(&mut self, timeframe: &Timeframe) -> Result<Option<Candle>> {
        let role = timeframe.role;
        let empty = self.queues.get(&role).map_or(true, |q| q.is_empty());
        if empty {
            let last = self.cursors.get(&role).copied();
            // First call pulls history, later calls only need the tail.
            let limit = if last.is_none() { self.history_limit } else { 5 };
            let bars = self.client.klines(&timeframe.interval, limit).await?;
            let queue = self.queues.entry(role).or_default();
            for bar in bars {
                if last.map_or(true, |ts| bar.ts > ts) {
                    queue.push_back(bar);
                }
            }
        }

        let next = self.queues.get_mut(&role).and_then(|q| q.pop_front());
        if let Some(bar) = next {
            self.cursors.insert(role, bar.ts);
        }
        Ok(next)
    }

    fn restart(&mut self, timeframe: &Timeframe) {
        self.cursors.remove(&timeframe.role);
        self.queues.remove(&timeframe.role);
    }
}

// =============================================================================
// Execution + account
// =============================================================================

/// Market-order execution. Stops and targets are monitored locally by the
/// position manager; closing sends the opposite market order.
pub struct BinanceExecution {
    client: BinanceClient,
    open: Mutex<HashMap<String, (Direction, f64)>>,
}

impl BinanceExecution {
    pub fn new(client: BinanceClient) -> Self {
        Self { client, open: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl Execution for BinanceExecution {
    async fn place_order(
        &self,
        direction: Direction,
        size: f64,
        stop_loss: f64,
        take_profits: &[f64],
    ) -> Result<OrderResult> {
        log(
            Level::Debug,
            Domain::Exec,
            "binance_place",
            obj(&[
                ("side", v_str(direction.side())),
                ("size", v_num(size)),
                ("stop_loss", v_num(stop_loss)),
                ("targets", v_num(take_profits.len() as f64)),
            ]),
        );
        let result = self.client.market_order(direction.side(), size).await?;
        if let Ok(mut open) = self.open.lock() {
            open.insert(result.order_id.clone(), (direction, size));
        }
        Ok(result)
    }

    async fn close_order(&self, order_id: &str) -> Result<ExitResult> {
        let entry = self.open.lock().ok().and_then(|open| open.get(order_id).copied());
        let (direction, size) =
            entry.ok_or_else(|| CoreError::Execution(format!("unknown order {}", order_id)))?;
        let side = match direction {
            Direction::Bullish => "SELL",
            Direction::Bearish => "BUY",
        };
        let fill = self.client.market_order(side, size).await?;
        if let Ok(mut open) = self.open.lock() {
            open.remove(order_id);
        }
        Ok(ExitResult { exit_price: fill.filled_price, fee: fill.fee })
    }
}

#[async_trait]
impl Account for BinanceClient {
    async fn get_equity(&self) -> Result<f64> {
        let (api_key, api_secret) = self.credentials()?;
        let signed = signed_query("", api_secret, Self::timestamp_ms())?;
        let url = format!("{}/api/v3/account?{}", self.base, signed);
        let resp = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await
            .map_err(|e| CoreError::Execution(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CoreError::Execution(format!("account http {}", resp.status().as_u16())));
        }
        let account: BinanceAccount =
            resp.json().await.map_err(|e| CoreError::Execution(e.to_string()))?;
        let equity = account
            .balances
            .iter()
            .filter(|b| b.asset == self.quote_asset)
            .map(|b| b.free.parse::<f64>().unwrap_or(0.0) + b.locked.parse::<f64>().unwrap_or(0.0))
            .sum();
        Ok(equity)
    }
}
