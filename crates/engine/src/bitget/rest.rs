use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{
    datetime_from_ms, Candle, Error, ExchangeService, MarginMode, MarketSnapshot,
    OpenOrderRequest, OrderHandle, OrderInfo, OrderSide, PositionInfo, Result, Timeframe,
};

const BASE_URL: &str = "https://api.bitget.com";
const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MARGIN_COIN: &str = "USDT";

/// REST API client for Bitget USDT-margined futures (v2 mix endpoints).
///
/// All requests are signed with the account triple (key, secret, passphrase);
/// public market-data endpoints accept the signature too, so every call goes
/// through the same signing path.
pub struct BitgetClient {
    api_key: String,
    secret: String,
    passphrase: String,
    http: Client,
}

impl BitgetClient {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
            http: Client::builder()
                .use_rustls_tls()
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    /// Bitget prehash: timestamp + method + path(+query) + body, HMAC-SHA256
    /// over the secret, base64 encoded.
    fn sign(&self, prehash: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(prehash.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    async fn signed_get(&self, path: &str, query: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        let signature = self.sign(&format!("{ts}GET{request_path}"));
        let url = format!("{BASE_URL}{request_path}");

        let resp = self
            .http
            .get(&url)
            .header("ACCESS-KEY", &self.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", ts.to_string())
            .header("ACCESS-PASSPHRASE", &self.passphrase)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, body: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let signature = self.sign(&format!("{ts}POST{path}{body}"));
        let url = format!("{BASE_URL}{path}");

        let resp = self
            .http
            .post(&url)
            .header("ACCESS-KEY", &self.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", ts.to_string())
            .header("ACCESS-PASSPHRASE", &self.passphrase)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }
}

#[async_trait]
impl ExchangeService for BitgetClient {
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: usize,
    ) -> Result<MarketSnapshot> {
        let query = format!(
            "symbol={}&productType={PRODUCT_TYPE}&granularity={}&limit={window}",
            to_exchange_symbol(symbol),
            granularity(timeframe),
        );
        let body = self.signed_get("/api/v2/mix/market/candles", &query).await?;
        let rows: Vec<CandleRow> = unwrap_envelope(&body)?;

        // Rows arrive oldest-first already.
        let candles = rows
            .into_iter()
            .map(|row| {
                Ok(Candle {
                    symbol: symbol.to_string(),
                    timestamp: datetime_from_ms(parse_i64(&row.0, "candle timestamp")?),
                    open: parse_f64(&row.1, "candle open")?,
                    high: parse_f64(&row.2, "candle high")?,
                    low: parse_f64(&row.3, "candle low")?,
                    close: parse_f64(&row.4, "candle close")?,
                    volume: parse_f64(&row.5, "candle volume")?,
                })
            })
            .collect::<Result<Vec<Candle>>>()?;
        Ok(MarketSnapshot::new(symbol, candles))
    }

    async fn fetch_all_futures_symbols(&self) -> Result<HashSet<String>> {
        let query = format!("productType={PRODUCT_TYPE}");
        let body = self.signed_get("/api/v2/mix/market/tickers", &query).await?;
        let tickers: Vec<TickerData> = unwrap_envelope(&body)?;
        Ok(tickers
            .into_iter()
            .filter_map(|t| from_exchange_symbol(&t.symbol))
            .collect())
    }

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64> {
        let query = format!(
            "symbol={}&productType={PRODUCT_TYPE}",
            to_exchange_symbol(symbol)
        );
        let body = self.signed_get("/api/v2/mix/market/ticker", &query).await?;
        let tickers: Vec<TickerData> = unwrap_envelope(&body)?;
        let ticker = tickers
            .first()
            .ok_or_else(|| Error::Exchange(format!("no ticker returned for {symbol}")))?;
        parse_f64(&ticker.last_pr, "last price")
    }

    async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        let query = format!(
            "symbol={}&productType={PRODUCT_TYPE}&marginCoin={MARGIN_COIN}",
            to_exchange_symbol(symbol)
        );
        let body = self
            .signed_get("/api/v2/mix/position/single-position", &query)
            .await?;
        let rows: Vec<PositionData> = unwrap_envelope(&body)?;
        rows.into_iter()
            .find(|p| parse_f64(&p.total, "position size").map(|v| v > 0.0).unwrap_or(false))
            .map(|p| position_from_live(&p))
            .transpose()
    }

    async fn fetch_positions(&self) -> Result<Vec<PositionInfo>> {
        let query = format!("productType={PRODUCT_TYPE}&marginCoin={MARGIN_COIN}");
        let body = self
            .signed_get("/api/v2/mix/position/all-position", &query)
            .await?;
        let rows: Vec<PositionData> = unwrap_envelope(&body)?;
        rows.iter().map(position_from_live).collect()
    }

    async fn fetch_positions_history(
        &self,
        symbol: &str,
        since_ms: i64,
    ) -> Result<Vec<PositionInfo>> {
        let query = format!(
            "symbol={}&productType={PRODUCT_TYPE}&startTime={since_ms}",
            to_exchange_symbol(symbol)
        );
        let body = self
            .signed_get("/api/v2/mix/position/history-position", &query)
            .await?;
        let history: PositionHistoryData = unwrap_envelope(&body)?;
        history.list.iter().map(position_from_history).collect()
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderInfo>> {
        let mut query = format!("productType={PRODUCT_TYPE}");
        if let Some(symbol) = symbol {
            query.push_str(&format!("&symbol={}", to_exchange_symbol(symbol)));
        }
        let body = self
            .signed_get("/api/v2/mix/order/orders-pending", &query)
            .await?;
        let pending: PendingOrdersData = unwrap_envelope(&body)?;
        pending
            .entrusted_list
            .unwrap_or_default()
            .into_iter()
            .map(|o| {
                Ok(OrderInfo {
                    id: o.order_id,
                    symbol: from_exchange_symbol(&o.symbol)
                        .ok_or_else(|| Error::Exchange(format!("unexpected symbol {}", o.symbol)))?,
                    side: parse_side(&o.side)?,
                    amount: parse_f64(&o.size, "order size")?,
                })
            })
            .collect()
    }

    async fn fetch_free_balance(&self) -> Result<f64> {
        let query = format!("productType={PRODUCT_TYPE}");
        let body = self.signed_get("/api/v2/mix/account/accounts", &query).await?;
        let accounts: Vec<AccountData> = unwrap_envelope(&body)?;
        let usdt = accounts
            .iter()
            .find(|a| a.margin_coin == MARGIN_COIN)
            .ok_or_else(|| Error::Exchange("no USDT futures account".into()))?;
        parse_f64(&usdt.available, "available balance")
    }

    async fn set_margin_mode_and_leverage(
        &self,
        symbol: &str,
        margin_mode: MarginMode,
        leverage: u32,
    ) -> Result<()> {
        let exchange_symbol = to_exchange_symbol(symbol);
        let mode = match margin_mode {
            MarginMode::Isolated => "isolated",
            MarginMode::Cross => "crossed",
        };
        let body = serde_json::json!({
            "symbol": exchange_symbol,
            "productType": PRODUCT_TYPE,
            "marginCoin": MARGIN_COIN,
            "marginMode": mode,
        })
        .to_string();
        self.signed_post("/api/v2/mix/account/set-margin-mode", &body)
            .await?;

        // Isolated margin takes leverage per hold side.
        let hold_sides: &[Option<&str>] = match margin_mode {
            MarginMode::Isolated => &[Some("long"), Some("short")],
            MarginMode::Cross => &[None],
        };
        for hold_side in hold_sides {
            let mut request = serde_json::json!({
                "symbol": exchange_symbol,
                "productType": PRODUCT_TYPE,
                "marginCoin": MARGIN_COIN,
                "leverage": leverage.to_string(),
            });
            if let Some(side) = hold_side {
                request["holdSide"] = serde_json::Value::String((*side).to_string());
            }
            let body = self
                .signed_post("/api/v2/mix/account/set-leverage", &request.to_string())
                .await?;
            let ack: LeverageData = unwrap_envelope(&body)?;
            let applied = match *hold_side {
                Some("short") => &ack.short_leverage,
                _ => &ack.long_leverage,
            };
            if applied.as_deref() != Some(leverage.to_string().as_str()) {
                return Err(Error::Exchange(format!(
                    "leverage not applied on {symbol}: requested {leverage}, exchange says {applied:?}"
                )));
            }
        }
        Ok(())
    }

    async fn create_order(&self, request: &OpenOrderRequest) -> Result<OrderHandle> {
        let mut order = serde_json::json!({
            "symbol": to_exchange_symbol(&request.symbol),
            "productType": PRODUCT_TYPE,
            "marginMode": match request.margin_mode {
                MarginMode::Isolated => "isolated",
                MarginMode::Cross => "crossed",
            },
            "marginCoin": MARGIN_COIN,
            "size": request.amount.to_string(),
            "side": request.side.to_string(),
            "tradeSide": request.trade_side.to_string(),
            "orderType": request.order_type.to_string(),
            "reduceOnly": if request.reduce_only { "YES" } else { "NO" },
        });
        if let Some(tp) = request.take_profit_price {
            order["presetStopSurplusPrice"] = serde_json::Value::String(tp.to_string());
        }
        if let Some(sl) = request.stop_loss_price {
            order["presetStopLossPrice"] = serde_json::Value::String(sl.to_string());
        }

        debug!(symbol = %request.symbol, side = %request.side, "Submitting order to Bitget");
        let body = self
            .signed_post("/api/v2/mix/order/place-order", &order.to_string())
            .await?;
        let placed: PlaceOrderData = unwrap_envelope(&body).map_err(|e| match e {
            Error::Exchange(msg) => Error::OrderRejected(msg),
            other => other,
        })?;

        Ok(OrderHandle {
            id: placed.order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            amount: request.amount,
            price: None,
        })
    }
}

/// "ETH/USDT:USDT" -> "ETHUSDT".
fn to_exchange_symbol(symbol: &str) -> String {
    symbol
        .strip_suffix("/USDT:USDT")
        .map(|base| format!("{base}USDT"))
        .unwrap_or_else(|| symbol.replace('/', "").replace(':', ""))
}

/// "ETHUSDT" -> "ETH/USDT:USDT". `None` for non-USDT-quoted instruments.
fn from_exchange_symbol(symbol: &str) -> Option<String> {
    symbol
        .strip_suffix("USDT")
        .filter(|base| !base.is_empty())
        .map(|base| format!("{base}/USDT:USDT"))
}

fn granularity(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::M30 => "30m",
        Timeframe::H1 => "1H",
        Timeframe::H4 => "4H",
        Timeframe::D1 => "1D",
    }
}

fn parse_f64(value: &str, label: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| Error::Exchange(format!("unparseable {label}: '{value}'")))
}

fn parse_i64(value: &str, label: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| Error::Exchange(format!("unparseable {label}: '{value}'")))
}

fn parse_side(value: &str) -> Result<OrderSide> {
    match value {
        "buy" | "long" => Ok(OrderSide::Buy),
        "sell" | "short" => Ok(OrderSide::Sell),
        other => Err(Error::Exchange(format!("unknown side '{other}'"))),
    }
}

fn position_from_live(data: &PositionData) -> Result<PositionInfo> {
    let margin = parse_f64(&data.margin_size, "margin size")?;
    let unrealized = parse_f64(&data.unrealized_pl, "unrealized pnl")?;
    Ok(PositionInfo {
        symbol: from_exchange_symbol(&data.symbol)
            .ok_or_else(|| Error::Exchange(format!("unexpected symbol {}", data.symbol)))?,
        contracts: parse_f64(&data.total, "position size")?,
        hold_side: parse_side(&data.hold_side)?,
        unrealized_pnl_pct: (margin > 0.0).then(|| unrealized / margin * 100.0),
        net_profit: None,
        open_avg_price: parse_f64(&data.open_price_avg, "open price")?,
        close_avg_price: None,
        ctime_ms: parse_i64(&data.c_time, "position ctime")?,
        utime_ms: parse_i64(&data.u_time, "position utime")?,
    })
}

fn position_from_history(data: &HistoryPositionData) -> Result<PositionInfo> {
    Ok(PositionInfo {
        symbol: from_exchange_symbol(&data.symbol)
            .ok_or_else(|| Error::Exchange(format!("unexpected symbol {}", data.symbol)))?,
        contracts: parse_f64(&data.open_total_pos, "position size")?,
        hold_side: parse_side(&data.hold_side)?,
        unrealized_pnl_pct: None,
        // Kept as the exchange's decimal string; empty settles to None so
        // close monitoring keeps polling.
        net_profit: data.net_profit.clone().filter(|s| !s.is_empty()),
        open_avg_price: parse_f64(&data.open_avg_price, "open price")?,
        close_avg_price: match data.close_avg_price.as_deref() {
            None | Some("") => None,
            Some(price) => Some(parse_f64(price, "close price")?),
        },
        ctime_ms: parse_i64(&data.ctime, "position ctime")?,
        utime_ms: parse_i64(&data.utime, "position utime")?,
    })
}

/// `{"code":"00000","msg":"success","data":...}` on every endpoint.
fn unwrap_envelope<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let envelope: Envelope<T> =
        serde_json::from_str(body).map_err(|e| Error::Exchange(e.to_string()))?;
    if envelope.code != "00000" {
        return Err(Error::Exchange(format!(
            "Bitget error {}: {}",
            envelope.code, envelope.msg
        )));
    }
    envelope
        .data
        .ok_or_else(|| Error::Exchange("response has no data field".into()))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

/// [ts, open, high, low, close, baseVolume, quoteVolume]
#[derive(Deserialize)]
struct CandleRow(String, String, String, String, String, String, #[serde(default)] String);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData {
    symbol: String,
    #[serde(default)]
    last_pr: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionData {
    symbol: String,
    total: String,
    hold_side: String,
    #[serde(default)]
    unrealized_pl: String,
    #[serde(default)]
    margin_size: String,
    open_price_avg: String,
    c_time: String,
    u_time: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionHistoryData {
    #[serde(default)]
    list: Vec<HistoryPositionData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPositionData {
    symbol: String,
    hold_side: String,
    open_avg_price: String,
    close_avg_price: Option<String>,
    open_total_pos: String,
    net_profit: Option<String>,
    ctime: String,
    utime: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingOrdersData {
    entrusted_list: Option<Vec<PendingOrder>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingOrder {
    order_id: String,
    symbol: String,
    side: String,
    size: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountData {
    margin_coin: String,
    available: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeverageData {
    #[serde(default)]
    long_leverage: Option<String>,
    #[serde(default)]
    short_leverage: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderData {
    order_id: String,
}
