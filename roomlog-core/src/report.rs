// ABOUTME: Plain-text transcript report for a history query
// ABOUTME: Fixed header, one line per message, per-line and whole-report truncation

use crate::message::Message;

/// Per-message content budget (chars)
pub const MAX_LINE_CHARS: usize = 200;

/// Whole-report budget (chars)
pub const MAX_REPORT_CHARS: usize = 5000;

/// Appended after a report cut at [`MAX_REPORT_CHARS`]
pub const TRUNCATION_MARKER: &str = "\n...\n(report truncated)";

/// Body of a report with no matching messages
pub const EMPTY_REPORT: &str = "No messages found matching the query.";

const RULE_WIDTH: usize = 50;

/// Cut `text` to `max_chars` characters, returning whether it was cut
fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

/// One transcript line: `[time] sender: content`
pub fn format_line(message: &Message) -> String {
    let text = message.render_text();
    let (content, cut) = truncate_chars(&text, MAX_LINE_CHARS);
    let ellipsis = if cut { "..." } else { "" };
    format!(
        "[{}] {}: {}{}",
        message.str_time(),
        message.sender_name(),
        content,
        ellipsis
    )
}

/// Apply the whole-report budget
pub fn truncate_report(report: String) -> String {
    let (kept, cut) = truncate_chars(&report, MAX_REPORT_CHARS);
    if cut {
        format!("{}{}", kept, TRUNCATION_MARKER)
    } else {
        report
    }
}

/// Format messages (newest first) into the report artifact
pub fn format_report(messages: &[Message], room: &str, query_description: &str) -> String {
    if messages.is_empty() {
        return EMPTY_REPORT.to_string();
    }

    let rule = "=".repeat(RULE_WIDTH);
    let mut lines = vec![
        "=== Room history ===".to_string(),
        format!("Room: {}", room),
        format!("Query: {}", query_description),
        format!("Found {} messages", messages.len()),
        rule.clone(),
        String::new(),
    ];
    lines.extend(messages.iter().map(format_line));
    lines.push(String::new());
    lines.push(rule);

    truncate_report(lines.join("\n"))
}
