use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

/// A WhatsApp conversation thread as stored by the backend.
///
/// Counters and timestamps are projections maintained server side; the
/// client only ever reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[ts(type = "\"active\" | \"closed\" | string")]
    pub status: SessionStatus,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// `unread_count <= message_count`, as guaranteed by the backend.
    pub fn counts_consistent(&self) -> bool {
        self.unread_count <= self.message_count
    }

    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}

/// Lifecycle status of a session.
///
/// Values the backend may add later (the console shows `pending` for some
/// entities) decode to `Other` instead of failing the whole list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
    #[serde(other)]
    Other,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
            SessionStatus::Other => "other",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status filter applied by the feed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum SessionFilter {
    #[default]
    All,
    Active,
    Closed,
}

impl SessionFilter {
    pub fn admits(&self, status: SessionStatus) -> bool {
        match self {
            SessionFilter::All => true,
            SessionFilter::Active => status == SessionStatus::Active,
            SessionFilter::Closed => status == SessionStatus::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionFilter::All => "all",
            SessionFilter::Active => "active",
            SessionFilter::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(SessionFilter::All),
            "active" => Ok(SessionFilter::Active),
            "closed" => Ok(SessionFilter::Closed),
            other => Err(format!(
                "unknown status filter '{}' (expected all, active or closed)",
                other
            )),
        }
    }
}

/// Aggregate counters shown above the session list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FeedSummary {
    pub total: usize,
    pub active: usize,
    pub closed: usize,
    pub other: usize,
    pub unread: u64,
}

impl FeedSummary {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        sessions.iter().fold(FeedSummary::default(), |mut summary, session| {
            summary.total += 1;
            match session.status {
                SessionStatus::Active => summary.active += 1,
                SessionStatus::Closed => summary.closed += 1,
                SessionStatus::Other => summary.other += 1,
            }
            summary.unread += u64::from(session.unread_count);
            summary
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_json(status: &str) -> String {
        format!(
            r#"{{
                "id": "s1",
                "customer_name": "Ahmed Ali",
                "customer_phone": "+201000000000",
                "status": "{}",
                "message_count": 3,
                "unread_count": 1,
                "last_message": "Hello",
                "last_message_time": "2024-05-01T10:00:00Z",
                "created_at": "2024-05-01T09:00:00Z",
                "company_id": "company-1"
            }}"#,
            status
        )
    }

    #[test]
    fn test_decode_backend_row() {
        let session: Session = serde_json::from_str(&session_json("active")).unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.customer_name.as_deref(), Some("Ahmed Ali"));
        assert!(session.counts_consistent());
        assert!(session.has_unread());
    }

    #[test]
    fn test_unknown_status_decodes_as_other() {
        let session: Session = serde_json::from_str(&session_json("pending")).unwrap();
        assert_eq!(session.status, SessionStatus::Other);
    }

    #[test]
    fn test_nullable_fields_default() {
        let json = r#"{"id":"s9","status":"closed","created_at":"2024-05-01T09:00:00Z",
                       "last_message":null,"last_message_time":null}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.message_count, 0);
        assert_eq!(session.unread_count, 0);
        assert!(session.customer_name.is_none());
        assert!(session.last_message_time.is_none());
    }

    #[test]
    fn test_filter_parse() {
        assert_eq!("Active".parse::<SessionFilter>().unwrap(), SessionFilter::Active);
        assert_eq!(" all ".parse::<SessionFilter>().unwrap(), SessionFilter::All);
        assert!("pending".parse::<SessionFilter>().is_err());
    }

    #[test]
    fn test_filter_admits() {
        assert!(SessionFilter::All.admits(SessionStatus::Other));
        assert!(SessionFilter::Active.admits(SessionStatus::Active));
        assert!(!SessionFilter::Active.admits(SessionStatus::Closed));
        assert!(!SessionFilter::Closed.admits(SessionStatus::Other));
    }

    #[test]
    fn test_summary_counts() {
        let mut a: Session = serde_json::from_str(&session_json("active")).unwrap();
        let mut b = a.clone();
        b.status = SessionStatus::Closed;
        b.unread_count = 0;
        a.unread_count = 2;
        let c: Session = serde_json::from_str(&session_json("pending")).unwrap();

        let summary = FeedSummary::from_sessions(&[a, b, c]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.active, 1);
        assert_eq!(summary.closed, 1);
        assert_eq!(summary.other, 1);
        assert_eq!(summary.unread, 3);
    }
}
