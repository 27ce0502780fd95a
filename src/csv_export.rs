// csv_export.rs
// CSV rendering shared by the export endpoints. Amounts are written with two
// decimals and no thousands separators so spreadsheets read them as numbers.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::money::format_plain;
use crate::period::Period;
use crate::profit_loss::{Statement, line_items};

pub const BANK_ACCOUNTS_HEADER: [&str; 11] = [
    "Account Type",
    "Bank / Network / Cash",
    "Account Name",
    "Account Number",
    "Currency",
    "Opening Balance",
    "Manager Deposits",
    "Withdrawals Out",
    "Net Flow (In - Out)",
    "Live Balance",
    "Last Reconciled",
];

/// Writes a header row followed by `rows`. Rows may differ in length.
pub fn render_csv<I, R>(header: &[&str], rows: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    if !header.is_empty() {
        writer.write_record(header).context("CSV write error")?;
    }
    for row in rows {
        writer.write_record(row).context("CSV write error")?;
    }
    writer.flush().context("CSV flush error")?;
    writer.into_inner().context("CSV buffer error")
}

/// Statement export: a short preamble, then one line per statement item.
pub fn profit_loss_csv(statement: &Statement, period: &Period, currency: &str) -> Result<Vec<u8>> {
    let mut rows: Vec<Vec<String>> = vec![
        vec!["Period".into(), period.label.clone()],
        vec!["From".into(), period.from.clone(), "To".into(), period.to.clone()],
        vec![],
        vec!["Line Item".into(), format!("Amount ({currency})")],
    ];
    for (label, amount) in line_items(statement) {
        rows.push(vec![label.to_string(), format_plain(amount)]);
    }
    render_csv(&["Trading, Profit & Loss Export"], rows)
}

pub fn csv_response(filename: &str, bytes: Vec<u8>) -> Response {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::{PeriodQuery, parse_period};
    use crate::profit_loss::{StatementInputs, compute_statement};
    use chrono::NaiveDate;

    #[test]
    fn quotes_fields_with_commas() {
        let bytes = render_csv(
            &["Name", "Amount"],
            vec![vec!["Osei, Kofi".to_string(), format_plain(1234.5)]],
        )
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "Name,Amount\r\n\"Osei, Kofi\",1234.50\r\n");
    }

    #[test]
    fn profit_loss_export_layout() {
        let now = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let period = parse_period(&PeriodQuery::default(), now);
        let statement = compute_statement(&StatementInputs {
            sales: 2500.0,
            total_expenses: 1000.0,
            ..Default::default()
        });
        let text = String::from_utf8(profit_loss_csv(&statement, &period, "GHS").unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "\"Trading, Profit & Loss Export\"");
        assert_eq!(lines[1], "Period,2024 Full Year");
        assert_eq!(lines[4], "Line Item,Amount (GHS)");
        assert_eq!(lines[5], "Sales,2500.00");
        assert_eq!(lines.last().copied(), Some("Net Profit,1500.00"));
    }
}
