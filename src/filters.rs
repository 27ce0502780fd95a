// filters.rs
// Custom askama filters shared by the HTML templates.

use std::fmt::Display;

use crate::money::{format_money, parse_amount};

/// `{{ value|money }}` renders any number as "1,234.50".
pub fn money<T: Display>(value: T, _: &dyn askama::Values) -> askama::Result<String> {
    let amount = parse_amount(&value.to_string()).unwrap_or(0.0);
    Ok(format_money(amount))
}

