pub mod display;

pub use display::{
    display_name, format_relative, format_session_row, format_summary, truncate_preview,
};
