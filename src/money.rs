// money.rs
// Monetary helpers: 2-dp rounding, display formats, and lenient coercion of stored amounts.

use std::fmt;

use serde::{
    Deserializer,
    de::{self, Visitor},
};

/// Amounts below this are treated as zero when comparing balances.
pub const EPSILON: f64 = 0.005;

pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

/// Parses user or stored text such as "1,250.50" or " 20 ".
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Display format with thousands separators: 1234.5 -> "1,234.50".
pub fn format_money(value: f64) -> String {
    let rounded = round2(value);
    let negative = rounded < 0.0;
    let fixed = format!("{:.2}", rounded.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}.{}", if negative { "-" } else { "" }, grouped, frac)
}

/// Export format: two decimals, no thousands separators.
pub fn format_plain(value: f64) -> String {
    format!("{:.2}", round2(value))
}

/// Accepts numbers (int/double), numeric strings, null or missing values.
/// Anything unparseable becomes 0.0 instead of failing the whole document.
pub fn de_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(AmountVisitor)
}

pub fn de_opt_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(OptAmountVisitor)
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = f64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number, a numeric string or null")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
        Ok(if v.is_finite() { v } else { 0.0 })
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> Result<f64, E> {
        Ok(0.0)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
        Ok(parse_amount(v).unwrap_or(0.0))
    }

    fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
        Ok(0.0)
    }

    fn visit_none<E: de::Error>(self) -> Result<f64, E> {
        Ok(0.0)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

struct OptAmountVisitor;

impl<'de> Visitor<'de> for OptAmountVisitor {
    type Value = Option<f64>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an optional number or numeric string")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v).filter(|v| v.is_finite()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(parse_amount(v))
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(OptAmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Row {
        #[serde(default, deserialize_with = "de_amount")]
        amount: f64,
        #[serde(default, deserialize_with = "de_opt_amount")]
        cost: Option<f64>,
    }

    #[test]
    fn rounds_to_cents() {
        assert_eq!(round2(1000.0 * 0.055), 55.0);
        assert_eq!(round2(0.1 + 0.2), 0.3);
        assert_eq!(round2(f64::NAN), 0.0);
    }

    #[test]
    fn formats_with_and_without_separators() {
        assert_eq!(format_money(1234567.891), "1,234,567.89");
        assert_eq!(format_money(50.0), "50.00");
        assert_eq!(format_money(-1200.5), "-1,200.50");
        assert_eq!(format_money(-0.001), "0.00");
        assert_eq!(format_plain(1234567.891), "1234567.89");
    }

    #[test]
    fn parses_amount_text() {
        assert_eq!(parse_amount(" 1,250.50 "), Some(1250.5));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn coerces_mixed_storage() {
        let doc = mongodb::bson::doc! { "amount": "1,200", "cost": 15_i32 };
        let row: Row = mongodb::bson::from_document(doc).unwrap();
        assert_eq!(row.amount, 1200.0);
        assert_eq!(row.cost, Some(15.0));

        let doc = mongodb::bson::doc! { "amount": mongodb::bson::Bson::Null };
        let row: Row = mongodb::bson::from_document(doc).unwrap();
        assert_eq!(row.amount, 0.0);
        assert_eq!(row.cost, None);

        let doc = mongodb::bson::doc! { "amount": "n/a", "cost": "" };
        let row: Row = mongodb::bson::from_document(doc).unwrap();
        assert_eq!(row.amount, 0.0);
        assert_eq!(row.cost, None);
    }
}
