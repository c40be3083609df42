//! Bybit private stream parser.
//!
//! Private frames look like `{"id":..,"topic":"order","creationTime":..,
//! "data":[...]}`. Numbers arrive as strings; empty strings mean "not
//! applicable" and map to `None`.

use rust_decimal::Decimal;
use serde::Deserialize;

use super::public::{control_reason, opt};
use crate::application::ports::{AuthReply, ParseError, PrivateParser};
use crate::domain::{
    BalanceUpdate, ExecutionReport, OrderStatus, OrderUpdate, PositionUpdate, RawPayload, Venue,
};
use crate::infrastructure::venues::decode::{decimal, int_or_string, side, timestamp_ms};

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "creationTime", default)]
    creation_time: Option<i64>,
    data: Vec<T>,
}

#[derive(Deserialize)]
struct AuthMsg {
    success: bool,
    #[serde(default)]
    ret_msg: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRow {
    symbol: String,
    order_id: String,
    #[serde(default)]
    order_link_id: String,
    side: String,
    order_status: String,
    #[serde(default)]
    price: String,
    qty: String,
    #[serde(default)]
    cum_exec_qty: String,
    #[serde(default)]
    avg_price: String,
    #[serde(deserialize_with = "int_or_string")]
    updated_time: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRow {
    symbol: String,
    #[serde(default)]
    side: String,
    size: String,
    #[serde(default)]
    entry_price: String,
    #[serde(default)]
    mark_price: String,
    #[serde(default)]
    unrealised_pnl: String,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    updated_time: Option<i64>,
}

#[derive(Deserialize)]
struct WalletRow {
    coin: Vec<CoinRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinRow {
    coin: String,
    wallet_balance: String,
    #[serde(default)]
    available_to_withdraw: String,
    #[serde(default)]
    free: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionRow {
    symbol: String,
    order_id: String,
    exec_id: String,
    side: String,
    exec_price: String,
    exec_qty: String,
    #[serde(default)]
    exec_fee: String,
    #[serde(default)]
    is_maker: bool,
    #[serde(deserialize_with = "int_or_string")]
    exec_time: i64,
}

fn opt_int_or_string<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    int_or_string(deserializer).map(Some)
}

fn order_status(status: &str) -> OrderStatus {
    match status {
        "New" | "Created" | "Untriggered" | "Triggered" => OrderStatus::New,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Filled" => OrderStatus::Filled,
        "Cancelled" | "PartiallyFilledCanceled" => OrderStatus::Canceled,
        "Rejected" => OrderStatus::Rejected,
        "Deactivated" => OrderStatus::Expired,
        _ => OrderStatus::Other,
    }
}

fn decimal_or_zero(field: &'static str, text: &str) -> Result<Decimal, ParseError> {
    if text.is_empty() {
        Ok(Decimal::ZERO)
    } else {
        decimal(field, text)
    }
}

/// Decodes Bybit private stream payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BybitPrivateParser;

impl PrivateParser for BybitPrivateParser {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn parse_auth_reply(&self, payload: &RawPayload) -> Result<AuthReply, ParseError> {
        let msg: AuthMsg = serde_json::from_slice(payload.as_bytes())?;
        if msg.success {
            Ok(AuthReply::Accepted)
        } else {
            Ok(AuthReply::Rejected(msg.ret_msg))
        }
    }

    fn parse_order_updates(&self, payload: &RawPayload) -> Result<Vec<OrderUpdate>, ParseError> {
        let msg: Envelope<OrderRow> = serde_json::from_slice(payload.as_bytes())?;
        msg.data
            .into_iter()
            .map(|row| {
                Ok(OrderUpdate {
                    venue: Venue::Bybit,
                    client_order_id: (!row.order_link_id.is_empty()).then_some(row.order_link_id),
                    symbol: row.symbol,
                    side: side("side", &row.side)?,
                    status: order_status(&row.order_status),
                    price: opt("price", Some(&row.price))?,
                    quantity: decimal("qty", &row.qty)?,
                    filled_quantity: decimal_or_zero("cumExecQty", &row.cum_exec_qty)?,
                    average_price: opt("avgPrice", Some(&row.avg_price))?,
                    timestamp: timestamp_ms(row.updated_time),
                    order_id: row.order_id,
                })
            })
            .collect()
    }

    fn parse_position_updates(
        &self,
        payload: &RawPayload,
    ) -> Result<Vec<PositionUpdate>, ParseError> {
        let msg: Envelope<PositionRow> = serde_json::from_slice(payload.as_bytes())?;
        let fallback = msg.creation_time.unwrap_or_default();
        msg.data
            .into_iter()
            .map(|row| {
                // Flat positions report side "" (or "None").
                let position_side = match row.side.as_str() {
                    "" | "None" => None,
                    other => Some(side("side", other)?),
                };
                Ok(PositionUpdate {
                    venue: Venue::Bybit,
                    side: position_side,
                    size: decimal_or_zero("size", &row.size)?,
                    entry_price: opt("entryPrice", Some(&row.entry_price))?,
                    mark_price: opt("markPrice", Some(&row.mark_price))?,
                    unrealized_pnl: if row.unrealised_pnl.is_empty() {
                        None
                    } else {
                        Some(decimal("unrealisedPnl", &row.unrealised_pnl)?)
                    },
                    timestamp: timestamp_ms(row.updated_time.unwrap_or(fallback)),
                    symbol: row.symbol,
                })
            })
            .collect()
    }

    fn parse_balance_updates(
        &self,
        payload: &RawPayload,
    ) -> Result<Vec<BalanceUpdate>, ParseError> {
        let msg: Envelope<WalletRow> = serde_json::from_slice(payload.as_bytes())?;
        let timestamp = timestamp_ms(msg.creation_time.unwrap_or_default());

        let mut updates = Vec::new();
        for coin in msg.data.into_iter().flat_map(|row| row.coin) {
            let total = decimal_or_zero("walletBalance", &coin.wallet_balance)?;
            let available = [&coin.available_to_withdraw, &coin.free]
                .into_iter()
                .find(|value| !value.is_empty())
                .map_or(Ok(total), |value| decimal("availableToWithdraw", value))?;
            updates.push(BalanceUpdate {
                venue: Venue::Bybit,
                asset: coin.coin,
                total,
                available,
                timestamp,
            });
        }
        Ok(updates)
    }

    fn parse_execution_reports(
        &self,
        payload: &RawPayload,
    ) -> Result<Vec<ExecutionReport>, ParseError> {
        let msg: Envelope<ExecutionRow> = serde_json::from_slice(payload.as_bytes())?;
        msg.data
            .into_iter()
            .map(|row| {
                Ok(ExecutionReport {
                    venue: Venue::Bybit,
                    side: side("side", &row.side)?,
                    price: decimal("execPrice", &row.exec_price)?,
                    quantity: decimal("execQty", &row.exec_qty)?,
                    fee: if row.exec_fee.is_empty() {
                        None
                    } else {
                        Some(decimal("execFee", &row.exec_fee)?)
                    },
                    is_maker: row.is_maker,
                    timestamp: timestamp_ms(row.exec_time),
                    order_id: row.order_id,
                    execution_id: row.exec_id,
                    symbol: row.symbol,
                })
            })
            .collect()
    }

    fn exchange_error_reason(&self, payload: &RawPayload) -> String {
        control_reason(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    const ORDER: &str = r#"{"id":"5923240c6880ab-c59f-420b-9adb-3639adc9dd90","topic":"order","creationTime":1672364262474,"data":[{"symbol":"ETHUSDT","orderId":"5cf98598-39a7-459e-97bf-76ca765ee020","side":"Sell","orderType":"Market","price":"72.5","qty":"1","timeInForce":"IOC","orderStatus":"Filled","orderLinkId":"","cumExecQty":"1","cumExecValue":"75","avgPrice":"75","createdTime":"1672364262444","updatedTime":"1672364262457","category":"option"}]}"#;
    const POSITION: &str = r#"{"id":"1003076014fb7eedb-c7e6-45d6-a8c1-270f0169171a","topic":"position","creationTime":1697682317044,"data":[{"positionIdx":2,"symbol":"BTCUSDT","side":"","size":"0","entryPrice":"0","markPrice":"28184.5","unrealisedPnl":"0","updatedTime":"1697682317038","category":"linear"},{"positionIdx":0,"symbol":"XRPUSDT","side":"Buy","size":"75","entryPrice":"0.3615","markPrice":"0.3374","unrealisedPnl":"-1.8075","updatedTime":"1672121182216","category":"linear"}]}"#;
    const WALLET: &str = r#"{"id":"592324d2bce751-ad38-48eb-8f42-4671d1fb4d4e","topic":"wallet","creationTime":1700034722104,"data":[{"accountType":"UNIFIED","coin":[{"coin":"BTC","walletBalance":"0.09","availableToWithdraw":"0.08","free":""},{"coin":"USDT","walletBalance":"11.5","availableToWithdraw":"","free":""}]}]}"#;
    const EXECUTION: &str = r#"{"id":"592324803b2785-26fa-4214-9963-bdd4727f07be","topic":"execution","creationTime":1672364174455,"data":[{"category":"linear","symbol":"XRPUSDT","execFee":"0.005061","execId":"7e2ae69c-4edf-5800-a352-893d52b446aa","execPrice":"0.3374","execQty":"25","execType":"Trade","isMaker":false,"orderId":"f6e324ff-99c2-4e89-9739-3086e47f9381","side":"Sell","execTime":"1672364174443"}]}"#;

    #[test]
    fn auth_replies() {
        let ok = RawPayload::text(r#"{"success":true,"ret_msg":"","op":"auth","conn_id":"c"}"#);
        assert_eq!(BybitPrivateParser.parse_auth_reply(&ok).unwrap(), AuthReply::Accepted);

        let rejected = RawPayload::text(
            r#"{"success":false,"ret_msg":"Invalid apikey","op":"auth","conn_id":"c"}"#,
        );
        assert_eq!(
            BybitPrivateParser.parse_auth_reply(&rejected).unwrap(),
            AuthReply::Rejected("Invalid apikey".to_string())
        );
    }

    #[test]
    fn order_update() {
        let orders = BybitPrivateParser
            .parse_order_updates(&RawPayload::text(ORDER))
            .unwrap();
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.client_order_id, None);
        assert_eq!(order.filled_quantity, dec!(1));
        assert_eq!(order.average_price, Some(dec!(75)));
        assert_eq!(order.timestamp.timestamp_millis(), 1_672_364_262_457);
    }

    #[test]
    fn flat_and_open_positions() {
        let positions = BybitPrivateParser
            .parse_position_updates(&RawPayload::text(POSITION))
            .unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].side, None);
        assert!(positions[0].size.is_zero());
        assert_eq!(positions[1].side, Some(Side::Buy));
        assert_eq!(positions[1].unrealized_pnl, Some(dec!(-1.8075)));
    }

    #[test]
    fn wallet_falls_back_to_total() {
        let balances = BybitPrivateParser
            .parse_balance_updates(&RawPayload::text(WALLET))
            .unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].available, dec!(0.08));
        assert_eq!(balances[1].asset, "USDT");
        assert_eq!(balances[1].available, dec!(11.5));
    }

    #[test]
    fn execution_report() {
        let fills = BybitPrivateParser
            .parse_execution_reports(&RawPayload::text(EXECUTION))
            .unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].fee, Some(dec!(0.005061)));
        assert!(!fills[0].is_maker);
        assert_eq!(fills[0].quantity, dec!(25));
    }

    #[test]
    fn order_status_mapping() {
        assert_eq!(order_status("PartiallyFilledCanceled"), OrderStatus::Canceled);
        assert_eq!(order_status("Deactivated"), OrderStatus::Expired);
        assert_eq!(order_status("Mystery"), OrderStatus::Other);
    }
}
