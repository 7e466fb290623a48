use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::{Method, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, instrument};

use super::{Balance, ExchangeApi, ExchangeError, ExchangePosition, FillResult};
use crate::engine::{Candle, CandleBuilder, Interval, SymbolPrecision};

type HmacSha256 = Hmac<Sha256>;

pub const BINANCE_FUTURES_URL: &str = "https://fapi.binance.com";
pub const BINANCE_FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

const RECV_WINDOW_MS: &str = "5000";
const KLINE_LIMIT: usize = 1500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
// "No need to change margin type."
const MARGIN_TYPE_UNCHANGED: i64 = -4046;

/// Binance USDT-M futures REST client.
pub struct BinanceFutures {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceFutures {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self, ExchangeError> {
        Self::with_base_url(api_key, api_secret, BINANCE_FUTURES_URL)
    }

    pub fn testnet(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self, ExchangeError> {
        Self::with_base_url(api_key, api_secret, BINANCE_FUTURES_TESTNET_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Adds `timestamp`, `recvWindow` and the HMAC-SHA256 `signature` to `params`.
    fn signed_query(&self, mut params: Vec<(&str, String)>) -> Result<String, ExchangeError> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        let query = serde_urlencoded::to_string(&params).map_err(|e| ExchangeError::Decode(e.to_string()))?;
        let signature = sign(&self.api_secret, &query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        let query = self.signed_query(params)?;
        debug!(%method, path, "signed request");
        let response = self
            .client
            .request(method, format!("{}{path}?{query}", self.base_url))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        handle_response(response).await
    }

    async fn public<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T, ExchangeError> {
        debug!(path, "public request");
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(params)
            .send()
            .await?;
        handle_response(response).await
    }
}

#[async_trait]
impl ExchangeApi for BinanceFutures {
    #[instrument(skip(self))]
    async fn place_market_order(&self, symbol: &str, quantity: f64) -> Result<FillResult, ExchangeError> {
        let client_order_id = format!("ta-{:016x}", rand::rng().random::<u64>());
        let params = market_order_params(symbol, quantity, client_order_id);
        let order: OrderResponse = self.signed(Method::POST, "/fapi/v1/order", params).await?;
        order.into_fill(quantity.signum())
    }

    #[instrument(skip(self))]
    async fn fetch_historical_data(
        &self,
        symbol: &str,
        interval: Interval,
        days: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let now = Utc::now();
        // one extra bar covers the still-open candle the caller drops
        let mut start = now - chrono::Duration::days(days as i64) - interval.duration();
        let mut candles: Vec<Candle> = Vec::new();

        loop {
            let params = [
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("startTime", start.timestamp_millis().to_string()),
                ("limit", KLINE_LIMIT.to_string()),
            ];
            let rows: Vec<Vec<Value>> = self.public("/fapi/v1/klines", &params).await?;
            let batch = rows.len();

            for row in &rows {
                let candle = parse_kline(row)?;
                if candles.last().is_none_or(|last| candle.open_time() > last.open_time()) {
                    candles.push(candle);
                }
            }

            match candles.last() {
                Some(last) if batch == KLINE_LIMIT && last.close_time() < now => {
                    start = last.open_time() + interval.duration();
                }
                _ => break,
            }
        }

        Ok(candles)
    }

    #[instrument(skip(self))]
    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, ExchangeError> {
        let info: ExchangeInfo = self.public("/fapi/v1/exchangeInfo", &[]).await?;
        info.symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .map(|s| SymbolPrecision::new(s.quantity_precision, s.price_precision))
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    #[instrument(skip(self))]
    async fn check_account_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        let rows: Vec<BalanceRow> = self.signed(Method::GET, "/fapi/v2/balance", Vec::new()).await?;
        rows.into_iter()
            .map(|row| {
                Ok(Balance {
                    balance: parse_number(&row.balance)?,
                    available: parse_number(&row.available_balance)?,
                    asset: row.asset,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn position(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        let rows: Vec<PositionRow> = self
            .signed(Method::GET, "/fapi/v2/positionRisk", vec![("symbol", symbol.to_string())])
            .await?;

        let mut size = 0.0;
        let mut entry_price = None;
        for row in rows.iter().filter(|r| r.symbol == symbol) {
            let amount = parse_number(&row.position_amt)?;
            if amount != 0.0 {
                size += amount;
                entry_price = Some(parse_number(&row.entry_price)?);
            }
        }

        Ok(Some(ExchangePosition {
            symbol: symbol.to_string(),
            size,
            entry_price: entry_price.filter(|p| *p > 0.0),
        }))
    }

    #[instrument(skip(self))]
    async fn prepare_symbol(&self, symbol: &str, leverage: f64) -> Result<(), ExchangeError> {
        let leverage = leverage.round().max(1.0) as u32;
        let _: Value = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                vec![("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
            )
            .await?;

        let margin: Result<Value, _> = self
            .signed(
                Method::POST,
                "/fapi/v1/marginType",
                vec![("symbol", symbol.to_string()), ("marginType", "ISOLATED".to_string())],
            )
            .await;
        match margin {
            Ok(_) => Ok(()),
            Err(ExchangeError::Rejected { code, .. }) if code == MARGIN_TYPE_UNCHANGED => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Query of a market order for an already rounded signed `quantity`.
fn market_order_params(symbol: &str, quantity: f64, client_order_id: String) -> Vec<(&'static str, String)> {
    let side = if quantity > 0.0 { "BUY" } else { "SELL" };
    vec![
        ("symbol", symbol.to_string()),
        ("side", side.to_string()),
        ("type", "MARKET".to_string()),
        // shortest round-trip form, so a rounded 0.3 goes out as "0.3"
        ("quantity", quantity.abs().to_string()),
        ("newOrderRespType", "RESULT".to_string()),
        ("newClientOrderId", client_order_id),
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: String,
    executed_qty: String,
    avg_price: String,
    update_time: i64,
}

impl OrderResponse {
    fn into_fill(self, sign: f64) -> Result<FillResult, ExchangeError> {
        let executed = parse_number(&self.executed_qty)?;
        let average_price = parse_number(&self.avg_price)?;
        if executed <= 0.0 || average_price <= 0.0 {
            return Err(ExchangeError::Unfilled(format!("order {} is {}", self.order_id, self.status)));
        }

        Ok(FillResult {
            order_id: self.order_id.to_string(),
            executed_quantity: sign * executed,
            average_price,
            timestamp: DateTime::from_timestamp_millis(self.update_time).unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    price_precision: u32,
    quantity_precision: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceRow {
    asset: String,
    balance: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRow {
    symbol: String,
    position_amt: String,
    entry_price: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    msg: String,
}

/// Hex HMAC-SHA256 of `data` keyed with `secret`.
fn sign(secret: &str, data: &str) -> Result<String, ExchangeError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| ExchangeError::Decode(format!("bad secret: {e}")))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await?;

    if !(200..300).contains(&status) {
        return Err(map_status(status, &body, retry_after));
    }
    Ok(serde_json::from_str(&body)?)
}

/// Maps a non-success response to an `ExchangeError`.
pub(crate) fn map_status(status: u16, body: &str, retry_after: Option<Duration>) -> ExchangeError {
    match status {
        418 | 429 => ExchangeError::RateLimited { retry_after },
        500..=599 => ExchangeError::Server {
            status,
            body: body.to_string(),
        },
        _ => match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody { code: -1003, .. }) => ExchangeError::RateLimited { retry_after },
            Ok(ErrorBody { code: -1121, msg }) => ExchangeError::UnknownSymbol(msg),
            Ok(ErrorBody { code, msg }) => ExchangeError::Rejected { code, msg },
            Err(_) => ExchangeError::Rejected {
                code: status as i64,
                msg: body.to_string(),
            },
        },
    }
}

/// Binance sends numbers as JSON strings or numbers depending on the endpoint.
fn parse_number(raw: &str) -> Result<f64, ExchangeError> {
    raw.parse::<f64>()
        .map_err(|e| ExchangeError::Decode(format!("bad number {raw:?}: {e}")))
}

fn value_number(value: &Value) -> Result<f64, ExchangeError> {
    match value {
        Value::String(s) => parse_number(s),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExchangeError::Decode(format!("bad number {n}"))),
        other => Err(ExchangeError::Decode(format!("expected a number, got {other}"))),
    }
}

fn value_time(value: &Value) -> Result<DateTime<Utc>, ExchangeError> {
    value
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| ExchangeError::Decode(format!("bad timestamp {value}")))
}

/// `[open_time, open, high, low, close, volume, close_time, ...]`
pub(crate) fn parse_kline(row: &[Value]) -> Result<Candle, ExchangeError> {
    if row.len() < 7 {
        return Err(ExchangeError::Decode(format!("kline has {} fields", row.len())));
    }
    CandleBuilder::builder()
        .open_time(value_time(&row[0])?)
        .open(value_number(&row[1])?)
        .high(value_number(&row[2])?)
        .low(value_number(&row[3])?)
        .close(value_number(&row[4])?)
        .volume(value_number(&row[5])?)
        .close_time(value_time(&row[6])?)
        .build()
        .map_err(|e| ExchangeError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_matches_documented_vector() {
        let signature = sign(
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j",
            "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559",
        )
        .unwrap();
        assert_eq!(signature, "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71");
    }

    #[test]
    fn signed_query_appends_signature_last() {
        let client = BinanceFutures::new("key", "secret").unwrap();
        let query = client.signed_query(vec![("symbol", "BTCUSDT".to_string())]).unwrap();
        assert!(query.starts_with("symbol=BTCUSDT&recvWindow=5000&timestamp="));
        let (payload, signature) = query.rsplit_once("&signature=").unwrap();
        assert_eq!(signature, sign("secret", payload).unwrap());
    }

    #[test]
    fn market_order_query() {
        let quantity = SymbolPrecision::new(3, 2).round_quantity(-0.30049).unwrap();
        let params = market_order_params("BTCUSDT", quantity, "ta-1".to_string());
        assert_eq!(
            serde_urlencoded::to_string(&params).unwrap(),
            "symbol=BTCUSDT&side=SELL&type=MARKET&quantity=0.3&newOrderRespType=RESULT&newClientOrderId=ta-1"
        );

        let params = market_order_params("BTCUSDT", 12.0, "ta-2".to_string());
        assert!(params.contains(&("side", "BUY".to_string())));
        assert!(params.contains(&("quantity", "12".to_string())));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(map_status(429, "", None), ExchangeError::RateLimited { .. }));
        assert!(matches!(map_status(418, "", None), ExchangeError::RateLimited { .. }));
        assert!(matches!(map_status(503, "busy", None), ExchangeError::Server { status: 503, .. }));
        assert_eq!(
            map_status(400, r#"{"code":-2019,"msg":"Margin is insufficient."}"#, None),
            ExchangeError::Rejected {
                code: -2019,
                msg: "Margin is insufficient.".into()
            }
        );
        assert!(matches!(
            map_status(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#, None),
            ExchangeError::UnknownSymbol(_)
        ));
        assert!(matches!(map_status(404, "not json", None), ExchangeError::Rejected { code: 404, .. }));
    }

    #[test]
    fn kline_row_parses() {
        let row = json!([
            1_700_000_000_000i64,
            "100.5",
            "101.0",
            "99.5",
            "100.0",
            "12.3",
            1_700_003_599_999i64,
            "1234.5",
            10,
            "1.0",
            "100.0",
            "0"
        ]);
        let candle = parse_kline(row.as_array().unwrap()).unwrap();
        assert_eq!(candle.open(), 100.5);
        assert_eq!(candle.close(), 100.0);
        assert_eq!(candle.volume(), 12.3);
        assert_eq!(candle.open_time().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn short_kline_row_fails() {
        let row = json!([1, "1", "1"]);
        assert!(matches!(parse_kline(row.as_array().unwrap()), Err(ExchangeError::Decode(_))));
    }

    #[test]
    fn order_response_to_fill() {
        let order: OrderResponse = serde_json::from_value(json!({
            "orderId": 42,
            "status": "FILLED",
            "executedQty": "0.123",
            "avgPrice": "30000.10",
            "updateTime": 1_700_000_000_000i64
        }))
        .unwrap();
        let fill = order.into_fill(-1.0).unwrap();
        assert_eq!(fill.order_id, "42");
        assert_eq!(fill.executed_quantity, -0.123);
        assert_eq!(fill.average_price, 30000.10);
    }

    #[test]
    fn expired_order_is_unfilled() {
        let order: OrderResponse = serde_json::from_value(json!({
            "orderId": 7,
            "status": "EXPIRED",
            "executedQty": "0",
            "avgPrice": "0.00",
            "updateTime": 1_700_000_000_000i64
        }))
        .unwrap();
        assert!(matches!(order.into_fill(1.0), Err(ExchangeError::Unfilled(_))));
    }
}
