//! JSON-RPC front end of the node: the dispatcher, method handlers, filter
//! registry and the recorded response cache.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filters;
pub mod logging;
pub mod params;
mod procedures;
pub mod views;

pub use cache::{Har, ResponseCache};
pub use config::RpcConfig;
pub use dispatcher::Dispatcher;
pub use error::{FilterError, RpcError};
pub use filters::{FilterChanges, FilterKind, FilterRegistry, LogCriteria};
pub use logging::init_tracing;
