//! Table and size formatting for CLI output.

use comfy_table::{ContentArrangement, Table};

const UNITS: [(&str, u64); 4] = [
    ("t", 1 << 40),
    ("g", 1 << 30),
    ("m", 1 << 20),
    ("k", 1 << 10),
];

/// Create a borderless table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    UNITS
        .iter()
        .skip(1)
        .find(|(_, size)| bytes >= *size)
        .map(|(unit, size)| {
            format!("{:.1} {}B", bytes as f64 / *size as f64, unit.to_uppercase())
        })
        .unwrap_or_else(|| format!("{} B", bytes))
}

/// Parse a size like "500m", "10g" or "1tb" into bytes.
///
/// Suffixes are case-insensitive; a bare number is bytes.
pub fn parse_size_bytes(s: &str) -> Result<u64, String> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty size value".to_string());
    }

    let digits = s.strip_suffix('b').unwrap_or(&s);
    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(unit, size)| digits.strip_suffix(unit).map(|n| (n, *size)))
        .unwrap_or((digits, 1));

    let number: u64 = number
        .parse()
        .map_err(|_| format!("invalid size value: {s}"))?;
    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size value too large: {s}"))
}
