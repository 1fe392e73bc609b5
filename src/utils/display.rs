use chrono::{DateTime, Utc};

use crate::core::{FeedSummary, Session, SessionStatus};

const PREVIEW_LENGTH: usize = 40;

/// Name, else phone, else a placeholder
pub fn display_name(session: &Session) -> &str {
    session
        .customer_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .or(session.customer_phone.as_deref())
        .unwrap_or("Unknown customer")
}

/// Shorten a message preview to `max` characters, ending with an ellipsis
pub fn truncate_preview(text: &str, max: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let keep = max.saturating_sub(1);
    let mut truncated: String = single_line.chars().take(keep).collect();
    truncated.push('…');
    truncated
}

/// Coarse age of a timestamp: "just now", "5m ago", "3h ago", "2d ago"
pub fn format_relative(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(timestamp);
    if elapsed.num_seconds() < 60 {
        "just now".to_string()
    } else if elapsed.num_minutes() < 60 {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed.num_hours() < 24 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}d ago", elapsed.num_days())
    }
}

fn status_marker(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "●",
        SessionStatus::Closed => "○",
        SessionStatus::Other => "?",
    }
}

/// One terminal line describing a session
pub fn format_session_row(session: &Session, now: DateTime<Utc>) -> String {
    let unread = if session.has_unread() {
        format!(" [{} unread]", session.unread_count)
    } else {
        String::new()
    };
    let when = session
        .last_message_time
        .map(|t| format_relative(t, now))
        .unwrap_or_else(|| "no messages".to_string());
    let preview = session
        .last_message
        .as_deref()
        .map(|m| format!(" \"{}\"", truncate_preview(m, PREVIEW_LENGTH)))
        .unwrap_or_default();

    format!(
        "{} {:<24} {:>3} msgs{} · {}{}",
        status_marker(session.status),
        display_name(session),
        session.message_count,
        unread,
        when,
        preview
    )
}

pub fn format_summary(summary: &FeedSummary) -> String {
    let mut line = format!(
        "{} sessions · {} active · {} closed · {} unread",
        summary.total, summary.active, summary.closed, summary.unread
    );
    if summary.other > 0 {
        line.push_str(&format!(" · {} other", summary.other));
    }
    line
}
