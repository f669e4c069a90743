use chrono::DateTime;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

use crate::correlation::Correlation;
use crate::pipeline::CorrelationResult;

pub fn format_timestamp(ts_ms: i64) -> String {
    if ts_ms == 0 {
        return "Never".to_string();
    }
    let seconds = ts_ms.div_euclid(1000);
    let nanoseconds = (ts_ms.rem_euclid(1000) * 1_000_000) as u32;
    DateTime::from_timestamp(seconds, nanoseconds)
        .map(|dt| dt.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown Time".to_string())
}

/// Brighter for stronger correlation, never dimmer than 40%.
fn intensity(corr: f64) -> u8 {
    let ratio = (0.4 + 0.6 * corr.abs()).min(1.0);
    (255.0 * ratio) as u8
}

fn correlation_cell(correlation: &Correlation) -> Cell {
    let cell = Cell::new(correlation.to_string()).set_alignment(CellAlignment::Right);
    match correlation.value() {
        Some(v) if v >= 0.0 => cell.fg(Color::Rgb { r: 0, g: intensity(v), b: 0 }),
        Some(v) => cell.fg(Color::Rgb { r: intensity(v), g: 0, b: 0 }),
        None => cell.fg(Color::DarkGrey),
    }
}

pub fn build_table(rows: &[CorrelationResult], reference_symbol: &str) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Symbol").add_attribute(Attribute::Bold),
            Cell::new("Mkt Cap Rank").add_attribute(Attribute::Bold),
            Cell::new(format!("Corr vs {}", reference_symbol))
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
        ]);

    for (i, row) in rows.iter().enumerate() {
        let rank = row.rank.map_or_else(|| "-".to_string(), |r| r.to_string());
        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&row.name),
            Cell::new(&row.symbol).fg(Color::Cyan),
            Cell::new(rank),
            correlation_cell(&row.correlation),
        ]);
    }
    table
}

/// Prints the table with a title line, or a notice when there is nothing yet.
pub fn print(rows: &[CorrelationResult], reference_symbol: &str, taken_at_ms: i64) {
    if rows.is_empty() {
        println!("No data found.");
        return;
    }
    let title = format!("(Data taken at {} UTC)", format_timestamp(taken_at_ms));
    println!("\n{}\n{}", title, build_table(rows, reference_symbol));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(symbol: &str, rank: Option<u32>, correlation: Correlation) -> CorrelationResult {
        CorrelationResult {
            symbol: symbol.into(),
            name: format!("{symbol} Name"),
            rank,
            correlation,
        }
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0), "Never");
        assert_eq!(format_timestamp(1_700_000_000_123), "14-11-2023 22:13:20");
    }

    #[test]
    fn table_shows_dash_for_missing_values() {
        let rows = vec![
            row("ETH", Some(2), Correlation::Value(0.8123)),
            row("NEW", None, Correlation::InsufficientData),
        ];

        let rendered = build_table(&rows, "BTC").to_string();

        assert!(rendered.contains("Corr vs BTC"));
        assert!(rendered.contains("0.812"));
        assert!(rendered.contains("ETH Name"));
        assert!(rendered.contains('–'));
    }

    #[test]
    fn intensity_never_drops_below_floor() {
        assert_eq!(intensity(0.0), 102);
        assert_eq!(intensity(-1.0), 255);
        assert_eq!(intensity(1.0), 255);
    }
}
