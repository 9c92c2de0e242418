// Client SDK for the eventhub backend: session handling, REST calls and
// lobby chat.

pub mod api;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod protocol;
pub mod scope;
pub mod session;

#[cfg(test)]
mod test_support;

pub use api::ApiClient;
pub use error::{AuthError, ClientError};
pub use session::{Session, SessionManager};
