pub mod config;
pub mod realtime;
pub mod session;

pub use config::{Config, ReconnectionConfig, TablesConfig};
pub use realtime::{ChangeKind, PhoenixMessage};
pub use session::{FeedSummary, Session, SessionFilter, SessionStatus};
