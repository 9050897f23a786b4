//! HTTP request handlers.

mod clients;
mod error;
mod health;

pub use clients::{
    auth_by_code, auth_by_phone, disconnect, get_clients, send_message, send_message_to_self,
};
pub use error::{ApiError, render_timeout};
pub use health::{livez, ping, version};
