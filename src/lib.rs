//! Legadilo Extension Host Library
//!
//! The privileged side of the Legadilo browser extension: an authenticated
//! client for the Legadilo API and the relay that runs it on behalf of the
//! extension's popups.

pub mod api;
pub mod auth;
pub mod logging;
pub mod models;
pub mod native;
pub mod options;
pub mod relay;
pub mod session;
pub mod storage;
pub mod transport;

pub use api::{ApiClient, ApiError};
pub use options::{MemoryOptionsStore, Options, OptionsForm, OptionsStore};
pub use relay::{Relay, Reply, Request, Response};
pub use transport::{Channel, HostCapabilities, OneShotTransport, PortTransport, Transport};
