//! Bitfinex Exchange Adapter
//!
//! WebSocket session handling for the exchange's public v1 feed.
//!
//! # Modules
//!
//! - `messages`: wire types for subscribe requests and control events
//! - `codec`: frame decoding and classification
//! - `transport`: tokio-tungstenite `Transport`
//! - `driver`: per-session state machine
//! - `client`: reconnecting supervisor around the driver
//! - `reconnect`: exponential backoff
//! - `status`: shared state for the health endpoint
//! - `symbols`: REST symbol discovery

pub mod client;
pub mod codec;
pub mod driver;
pub mod messages;
pub mod reconnect;
pub mod status;
pub mod symbols;
pub mod transport;

pub use client::{FeedSupervisor, FeedSupervisorConfig, SupervisorError};
pub use codec::{Classified, ClassifyError, Frame, JsonCodec, classify};
pub use driver::{CollectionNames, DriverConfig, DriverError, DriverSummary, StreamDriver};
pub use messages::{BookParams, ErrorEvent, SubscribeRequest, SubscribedEvent, UnsubscribeRequest};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use status::{DriverState, FeedStatus, FeedStatusSnapshot};
pub use symbols::{SymbolDiscoveryError, discover_symbols};
pub use transport::WsTransport;
