//! Small shared CLI helpers.

use colored::Colorize;

/// `Some` when the string carries content.
pub fn nonempty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

pub fn print_banner() {
    println!("{}", "  rustle".bold().cyan());
    println!("{}", "  multi-channel agent runtime".dimmed());
}

pub fn print_response(text: &str) {
    println!();
    println!("{text}");
    println!();
}

/// Short "2m ago" style rendering for job/session listings.
pub fn format_age(then_ms: i64) -> String {
    let now = chrono::Utc::now().timestamp_millis();
    let delta_s = ((now - then_ms).max(0) / 1000) as u64;
    match delta_s {
        0..=59 => format!("{delta_s}s ago"),
        60..=3599 => format!("{}m ago", delta_s / 60),
        3600..=86_399 => format!("{}h ago", delta_s / 3600),
        _ => format!("{}d ago", delta_s / 86_400),
    }
}
