//! Read access to an upstream JSON-RPC node for fork mode.

pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use client::{ForkClient, RetryPolicy};
pub use error::ForkError;
pub use transport::{ForkTransport, HttpTransport, MockTransport};
pub use types::{RemoteAccount, RemoteHeader};
