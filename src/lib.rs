pub mod api;
pub mod booking;
pub mod cli;
pub mod config;
pub mod guard;
pub mod matching;
pub mod session;
pub mod validation;

#[cfg(test)]
mod testing;

pub use api::{ActionError, ApiClient};
pub use booking::BookingOrchestrator;
pub use config::Config;
pub use session::SessionManager;
