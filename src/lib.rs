// SessionFeed Library
// Live, filterable view of a tenant's WhatsApp conversation sessions

pub mod cli;
pub mod client;
pub mod core;
pub mod feed;
pub mod utils;

// Re-export commonly used types
pub use crate::client::{DataApiClient, RealtimeClient};
pub use crate::core::{Config, FeedSummary, Session, SessionFilter, SessionStatus};
pub use crate::feed::{FeedError, FeedPhase, FeedSnapshot, SessionFeed};

// Error handling
pub use anyhow::{Error, Result};
