use crate::error::{AgentManagerError, Result};

/// Parse a memory size such as `2048MB`, `4G` or `512` into bytes.
///
/// Units are binary multiples and case-insensitive; a trailing `B` is
/// optional (`M`, `MB` and `MiB` are the same unit). A bare number is bytes.
pub fn parse_memory(size: &str) -> Result<u64> {
    let s = size.trim();
    if s.is_empty() {
        return Err(invalid(size, "empty size string"));
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num_part, unit_part) = s.split_at(split);

    let number: u64 = num_part
        .parse()
        .map_err(|_| invalid(size, "missing number"))?;

    let mut unit = unit_part.trim().to_uppercase();
    if unit.ends_with('B') {
        unit.pop();
    }
    if unit.len() == 2 && unit.ends_with('I') && unit.starts_with(['K', 'M', 'G', 'T']) {
        unit.pop();
    }

    let shift = match unit.as_str() {
        "" => 0,
        "K" => 10,
        "M" => 20,
        "G" => 30,
        "T" => 40,
        _ => return Err(invalid(size, "unknown unit")),
    };

    number
        .checked_mul(1u64 << shift)
        .ok_or_else(|| invalid(size, "size too large"))
}

/// Render a byte count with the largest binary unit that divides it evenly.
pub fn format_memory(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024 && value % 1024 == 0 && unit < UNITS.len() - 1 {
        value /= 1024;
        unit += 1;
    }

    format!("{}{}", value, UNITS[unit])
}

fn invalid(size: &str, reason: &str) -> AgentManagerError {
    AgentManagerError::InvalidConfig(format!("invalid memory size '{}': {}", size, reason))
}
