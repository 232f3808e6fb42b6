//! Human-readable formatting shared by issue messages and the report.

pub fn format_blocks(blocks: u64) -> String {
    let value = blocks as f64;
    if blocks >= 1_000_000 {
        format!("{:.1}M", value / 1_000_000.0)
    } else if blocks >= 1_000 {
        format!("{:.1}K", value / 1_000.0)
    } else {
        blocks.to_string()
    }
}

/// Token amount in GRT, scaled from wei.
pub fn format_tokens(tokens: u128) -> String {
    let grt = tokens as f64 / 1e18;
    if grt >= 1.0 {
        format!("{grt:.0} GRT")
    } else {
        format!("{grt:.2} GRT")
    }
}

pub fn format_duration(seconds: f64) -> String {
    if seconds < 0.0 {
        return "expired".to_owned();
    }
    if seconds < 3600.0 {
        format!("{}m", (seconds / 60.0) as u64)
    } else if seconds < 86400.0 {
        format!("{}h", (seconds / 3600.0) as u64)
    } else {
        let days = (seconds / 86400.0) as u64;
        let hours = ((seconds % 86400.0) / 3600.0) as u64;
        format!("{days}d {hours}h")
    }
}
