use crate::core::{Session, SessionFilter};

/// Whether a session passes the status filter and the search text.
///
/// Search is a case-insensitive substring match on the customer name or
/// phone; empty search matches everything. Whitespace is part of the needle.
pub fn matches(session: &Session, filter: SessionFilter, search_text: &str) -> bool {
    if !filter.admits(session.status) {
        return false;
    }

    let needle = search_text.to_lowercase();
    if needle.is_empty() {
        return true;
    }

    [&session.customer_name, &session.customer_phone]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
}

/// Sessions passing [`matches`], in their original order
pub fn visible_items(items: &[Session], filter: SessionFilter, search_text: &str) -> Vec<Session> {
    items
        .iter()
        .filter(|session| matches(session, filter, search_text))
        .cloned()
        .collect()
}
