//! SOS Relay Dispatcher
//!
//! Delivers an emergency message to a list of contacts:
//! - Dispatcher: sequential sends with a fixed inter-message delay, per-recipient
//!   outcome tracking, live progress and an at-most-one-run guard
//! - MessagingCapability: seam for the SMS transport (HTTP gateway, dry run)
//! - LocationProvider: seam for the coordinates appended as a map link
//! - ContactBook: caller-owned contacts and message template

pub mod capability;
pub mod contacts;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod location;

pub use capability::{LogMessagingCapability, MessagingCapability};
pub use contacts::ContactBook;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{ContactError, DispatchError, LocationError, SendError};
pub use gateway::{HttpSmsGateway, HttpSmsGatewayConfig};
pub use location::{
    CachedLocationProvider, LocationProvider, LocationStatus, NoLocationProvider,
    StaticLocationProvider,
};

pub use tokio_util::sync::CancellationToken;
