use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

const PREVIEW_LIMIT: usize = 64;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Something a command prints as one record.
pub trait Report: Serialize {
    /// Ordered `(field, value)` pairs for table and pretty output.
    fn rows(&self) -> Vec<(&'static str, String)>;
}

pub fn print_report<R: Report>(report: &R, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let rows = report.rows();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(rows.iter().map(|(name, _)| name.to_uppercase()))
                .add_row(rows.into_iter().map(|(_, value)| value));
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line = report
                .rows()
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
    }
}

/// Printable view of a payload: UTF-8 text when it is, a hex dump otherwise.
pub fn payload_preview(payload: &[u8]) -> String {
    let shown = &payload[..payload.len().min(PREVIEW_LIMIT)];
    let ellipsis = if payload.len() > PREVIEW_LIMIT { "..." } else { "" };
    match std::str::from_utf8(shown) {
        Ok(text) if !text.chars().any(char::is_control) => format!("{text}{ellipsis}"),
        _ => format!("0x{}{ellipsis}", hex::encode(shown)),
    }
}
