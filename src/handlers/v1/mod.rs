//! Versioned API handlers.

mod sessions;
mod ws;

pub use sessions::{
    create_session, delete_session, get_history, get_stats, list_sessions, send_message,
};
pub use ws::ws_session;
