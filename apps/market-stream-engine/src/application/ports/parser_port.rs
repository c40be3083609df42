//! Classifier and Parser Ports
//!
//! The cheap first step of the pipeline (classification) and the per-type
//! decoding steps that follow it. Venue adapters implement both.

use crate::application::services::pool::LevelPool;
use crate::domain::{
    BalanceUpdate, ExecutionReport, OrderBook, OrderUpdate, PositionUpdate, RawPayload, Ticker,
    Trade, Venue, WebSocketMessageType,
};

/// Payload decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Malformed JSON, or JSON that does not match the expected shape.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary payload that does not carry an encoding we understand.
    #[error("unsupported payload encoding ({0})")]
    UnsupportedEncoding(&'static str),

    /// The classifier could not assign a type.
    #[error("unrecognized message")]
    Unrecognized,

    /// The payload type is not handled by this stream.
    #[error("unexpected {0} message on this stream")]
    UnexpectedType(WebSocketMessageType),

    /// Well-formed payload with a value we cannot map.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

impl ParseError {
    /// Build an [`ParseError::InvalidField`].
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Assigns a logical type to a raw payload.
///
/// Must stay a bounded, constant-cost inspection: a magic-byte check or a
/// shallow peek at top-level fields, never a full decode.
pub trait MessageClassifier: Send + Sync {
    /// Classify one payload.
    fn classify(&self, payload: &RawPayload) -> WebSocketMessageType;
}

/// Decodes market-data payloads.
///
/// `Ok(None)` / empty vectors mean the payload classified correctly but had
/// nothing actionable in it.
pub trait PublicParser: Send + Sync {
    /// Venue stamped on produced events.
    fn venue(&self) -> Venue;

    /// Decode an orderbook snapshot or diff. Level vectors must come from
    /// `pool`; the caller returns them after dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn parse_orderbook(
        &self,
        payload: &RawPayload,
        pool: &LevelPool,
    ) -> Result<Option<OrderBook>, ParseError>;

    /// Decode trade prints.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn parse_trades(&self, payload: &RawPayload) -> Result<Vec<Trade>, ParseError>;

    /// Decode a ticker.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn parse_ticker(&self, payload: &RawPayload) -> Result<Option<Ticker>, ParseError>;

    /// Reply to a venue-initiated application ping, if the venue expects one.
    fn ping_reply(&self, _payload: &RawPayload) -> Option<String> {
        None
    }

    /// Human-readable reason from an exchange error payload.
    fn exchange_error_reason(&self, payload: &RawPayload) -> String {
        String::from_utf8_lossy(payload.as_bytes()).into_owned()
    }
}

/// Venue verdict on an auth handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    /// Handshake accepted.
    Accepted,
    /// Handshake rejected, with the venue's reason.
    Rejected(String),
}

/// Decodes authenticated trading-stream payloads.
pub trait PrivateParser: Send + Sync {
    /// Venue stamped on produced events.
    fn venue(&self) -> Venue;

    /// Interpret an auth response.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn parse_auth_reply(&self, payload: &RawPayload) -> Result<AuthReply, ParseError>;

    /// Decode order updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn parse_order_updates(&self, payload: &RawPayload) -> Result<Vec<OrderUpdate>, ParseError>;

    /// Decode position updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn parse_position_updates(
        &self,
        payload: &RawPayload,
    ) -> Result<Vec<PositionUpdate>, ParseError>;

    /// Decode wallet balance updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn parse_balance_updates(&self, payload: &RawPayload)
    -> Result<Vec<BalanceUpdate>, ParseError>;

    /// Decode fills.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn parse_execution_reports(
        &self,
        payload: &RawPayload,
    ) -> Result<Vec<ExecutionReport>, ParseError>;

    /// Human-readable reason from an exchange error payload.
    fn exchange_error_reason(&self, payload: &RawPayload) -> String {
        String::from_utf8_lossy(payload.as_bytes()).into_owned()
    }
}
