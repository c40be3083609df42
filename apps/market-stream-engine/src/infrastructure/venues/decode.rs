//! Shared Decoding Helpers
//!
//! Level arrays are decoded straight into pooled buffers by a
//! [`DeserializeSeed`], so the orderbook path never builds an intermediate
//! `Vec<Vec<String>>` or `serde_json::Value`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::{self, DeserializeSeed, Deserializer, SeqAccess, Visitor};
use serde_json::value::RawValue;

use crate::application::ports::ParseError;
use crate::application::services::LevelPool;
use crate::domain::{PriceLevel, Side};

// =============================================================================
// Price Levels
// =============================================================================

/// Appends `[price, quantity]` pairs to a borrowed buffer.
pub struct LevelsSeed<'a> {
    /// Destination; existing contents are kept.
    pub out: &'a mut Vec<PriceLevel>,
}

impl<'de> DeserializeSeed<'de> for LevelsSeed<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for LevelsSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of [price, quantity] pairs")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        if let Some(hint) = seq.size_hint() {
            self.out.reserve(hint);
        }
        while let Some((price, quantity)) = seq.next_element::<(Decimal, Decimal)>()? {
            self.out.push(PriceLevel::new(price, quantity));
        }
        Ok(())
    }
}

/// Decode a level array into a buffer taken from `pool`.
///
/// # Errors
///
/// Returns an error if the array is malformed. The buffer goes back to the
/// pool in that case.
pub fn pooled_levels(raw: Option<&RawValue>, pool: &LevelPool) -> Result<Vec<PriceLevel>, ParseError> {
    let mut levels = pool.acquire();
    let Some(raw) = raw else {
        return Ok(levels);
    };
    let mut deserializer = serde_json::Deserializer::from_str(raw.get());
    match (LevelsSeed { out: &mut levels }).deserialize(&mut deserializer) {
        Ok(()) => Ok(levels),
        Err(e) => {
            pool.release(levels);
            Err(ParseError::Json(e))
        }
    }
}

// =============================================================================
// Scalars
// =============================================================================

/// Millisecond epoch timestamp, falling back to now when out of range.
#[must_use]
pub fn timestamp_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// Parse a decimal string.
///
/// # Errors
///
/// Returns `InvalidField` if the text is not a decimal.
pub fn decimal(field: &'static str, text: &str) -> Result<Decimal, ParseError> {
    Decimal::from_str(text).map_err(|e| ParseError::invalid(field, format!("{text:?}: {e}")))
}

/// Parse a decimal carried as a bare JSON number, without going through `f64`.
///
/// # Errors
///
/// Returns `InvalidField` if the raw text is not a plain or scientific number.
pub fn decimal_number(field: &'static str, raw: &RawValue) -> Result<Decimal, ParseError> {
    let text = raw.get();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|e| ParseError::invalid(field, format!("{text:?}: {e}")))
}

/// Parse a decimal string where an empty string or zero means absent.
///
/// # Errors
///
/// Returns `InvalidField` if the text is neither empty nor a decimal.
pub fn decimal_opt(field: &'static str, text: &str) -> Result<Option<Decimal>, ParseError> {
    if text.is_empty() {
        return Ok(None);
    }
    let value = decimal(field, text)?;
    Ok((!value.is_zero()).then_some(value))
}

/// Parse an order side, case-insensitively.
///
/// # Errors
///
/// Returns `InvalidField` for anything other than buy/sell (or bid/ask).
pub fn side(field: &'static str, text: &str) -> Result<Side, ParseError> {
    if text.eq_ignore_ascii_case("buy") || text.eq_ignore_ascii_case("bid") {
        Ok(Side::Buy)
    } else if text.eq_ignore_ascii_case("sell") || text.eq_ignore_ascii_case("ask") {
        Ok(Side::Sell)
    } else {
        Err(ParseError::invalid(field, format!("unknown side {text:?}")))
    }
}

/// Deserialize an integer carried either as a JSON number or as a string.
///
/// # Errors
///
/// Fails if the value is neither.
pub fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct IntVisitor;

    impl Visitor<'_> for IntVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer or integer string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(IntVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).unwrap()
    }

    #[test]
    fn levels_decode_exactly() {
        let pool = LevelPool::default();
        let raw = raw(r#"[["0.00240000","10.5"],["0.0025","0"]]"#);
        let levels = pooled_levels(Some(&raw), &pool).unwrap();

        assert_eq!(
            levels,
            vec![
                PriceLevel::new(dec!(0.00240000), dec!(10.5)),
                PriceLevel::new(dec!(0.0025), dec!(0)),
            ]
        );
        assert_eq!(levels[0].price.to_string(), "0.00240000");
    }

    #[test]
    fn missing_levels_are_empty() {
        let pool = LevelPool::default();
        assert!(pooled_levels(None, &pool).unwrap().is_empty());
    }

    #[test]
    fn malformed_levels_return_buffer() {
        let pool = LevelPool::default();
        let raw = raw(r#"[["abc","1"]]"#);
        assert!(pooled_levels(Some(&raw), &pool).is_err());
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn json_numbers_stay_exact() {
        assert_eq!(decimal_number("p", &raw("96780000.0")).unwrap(), dec!(96780000.0));
        assert_eq!(decimal_number("v", &raw("0.00012345")).unwrap().to_string(), "0.00012345");
        assert_eq!(decimal_number("v", &raw("1.5E-4")).unwrap(), dec!(0.00015));
        assert!(decimal_number("v", &raw(r#""x""#)).is_err());
    }

    #[test]
    fn optional_decimals() {
        assert_eq!(decimal_opt("p", "").unwrap(), None);
        assert_eq!(decimal_opt("p", "0").unwrap(), None);
        assert_eq!(decimal_opt("p", "1.5").unwrap(), Some(dec!(1.5)));
        assert!(decimal_opt("p", "x").is_err());
    }

    #[test]
    fn sides() {
        assert_eq!(side("S", "Buy").unwrap(), Side::Buy);
        assert_eq!(side("S", "ASK").unwrap(), Side::Sell);
        assert!(side("S", "").is_err());
    }

    #[test]
    fn integers_from_strings() {
        #[derive(serde::Deserialize)]
        struct Holder {
            #[serde(deserialize_with = "int_or_string")]
            ts: i64,
        }
        let a: Holder = serde_json::from_str(r#"{"ts":"1700000000000"}"#).unwrap();
        let b: Holder = serde_json::from_str(r#"{"ts":1700000000000}"#).unwrap();
        assert_eq!(a.ts, b.ts);
    }
}
