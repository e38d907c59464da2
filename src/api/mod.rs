//! Marketplace API access.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ApiClient, LoginResponse, RegisterRequest};
pub use error::{ActionError, ClientError, ErrorKind, Operation};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
