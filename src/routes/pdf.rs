// routes/pdf.rs
// Renders the profit & loss statement to PDF through the `typst` CLI.

use std::{
    fs,
    process::{Command, Stdio},
};

use rand::{Rng, distr::Alphanumeric};

use crate::money::format_money;
use crate::profit_loss::line_items;
use crate::state::ProfitLossReport;

/// Lines printed in bold as subtotals.
const SUBTOTALS: [&str; 5] = [
    "Net Sales",
    "Cost of Sales",
    "Gross Profit",
    "Total Expenses",
    "Net Profit",
];

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '#' | '*' | '_' | '$' | '@' | '<' | '>' | '[' | ']' | '`' | '"'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Typst source for the statement table.
pub fn statement_source(report: &ProfitLossReport, currency: &str) -> String {
    let mut src = String::new();
    src.push_str("#set page(paper: \"a4\", margin: 2cm)\n");
    src.push_str("#set text(size: 10pt)\n\n");
    src.push_str("= Trading, Profit & Loss Account\n\n");
    src.push_str(&format!(
        "{} ({} to {})",
        escape(&report.label),
        report.from,
        report.to
    ));
    if let Some(branch) = &report.branch_id {
        src.push_str(&format!(" \\\n Branch: {}", escape(branch)));
    }
    src.push_str("\n\n#table(\n  columns: (1fr, auto),\n  align: (left, right),\n");
    src.push_str(&format!(
        "  [*Line Item*], [*Amount ({})*],\n",
        escape(currency)
    ));
    for (label, amount) in line_items(&report.statement) {
        let value = escape(&format_money(amount));
        if SUBTOTALS.contains(&label) {
            src.push_str(&format!("  [*{label}*], [*{value}*],\n"));
        } else {
            src.push_str(&format!("  [{label}], [{value}],\n"));
        }
    }
    src.push_str(")\n");
    if !report.todo_notes.is_empty() {
        src.push_str("\n#text(size: 8pt)[\n");
        for note in &report.todo_notes {
            src.push_str(&format!("- {}\n", escape(note)));
        }
        src.push_str("]\n");
    }
    src
}

/// Compiles Typst source in a scratch directory and returns the PDF bytes.
pub fn compile_typst(typst_bin: &str, source: &str) -> Result<Vec<u8>, String> {
    let mut rng = rand::rng();
    let suffix: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();

    let tmp_dir = std::env::temp_dir().join(format!("salesdesk-{suffix}"));
    fs::create_dir(&tmp_dir).map_err(|e| format!("could not create temp dir: {e}"))?;

    let input_path = tmp_dir.join("statement.typ");
    let output_path = tmp_dir.join("statement.pdf");

    if let Err(err) = fs::write(&input_path, source) {
        let _ = fs::remove_dir_all(&tmp_dir);
        return Err(format!("could not write typst source: {err}"));
    }

    let output = Command::new(typst_bin)
        .arg("compile")
        .arg(&input_path)
        .arg(&output_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| {
            let _ = fs::remove_dir_all(&tmp_dir);
            if err.kind() == std::io::ErrorKind::NotFound {
                format!("`{typst_bin}` not found; install typst or set TYPST_BIN")
            } else {
                format!("typst failed to start: {err}")
            }
        })?;

    if !output.status.success() {
        let _ = fs::remove_dir_all(&tmp_dir);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(if stderr.trim().is_empty() {
            "typst compile failed".to_string()
        } else {
            stderr
        });
    }

    let pdf = fs::read(&output_path).map_err(|err| format!("could not read PDF: {err}"));
    let _ = fs::remove_dir_all(&tmp_dir);
    pdf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_characters_are_escaped() {
        assert_eq!(escape("A #1 *deal*"), "A \\#1 \\*deal\\*");
        assert_eq!(escape("GHS 1,200.00"), "GHS 1,200.00");
    }

    #[test]
    fn missing_binary_is_reported() {
        let err = compile_typst("salesdesk-no-such-typst", "= Hi").unwrap_err();
        assert!(err.contains("not found"));
    }
}
