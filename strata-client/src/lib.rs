//! Rust client SDK for the Strata replicated event store.
//!
//! The crate's center of gravity is cluster topology discovery and
//! resilient connection management: finding a reachable, role-appropriate
//! node through gossip, ranking candidates, pooling live channels and
//! failing over transparently, safe under concurrent use and with at most
//! one discovery in flight at a time. Operations drive their RPCs through
//! the validated channel the client hands out.
//!
//! # Example
//!
//! ```no_run
//! use strata_client::{Client, ClientSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings: ClientSettings =
//!         "strata://node-1:2113,node-2:2113,node-3:2113?nodePreference=leader".parse()?;
//!     let client = Client::new(settings)?;
//!
//!     let info = client.current_channel().await?;
//!     println!("connected to {}", info.endpoint);
//!     Ok(())
//! }
//! ```

#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo
)]
#![deny(clippy::unwrap_in_result, clippy::panic_in_result_fn)]

pub mod channel;
pub mod client;
pub mod discovery;
pub mod error;
pub mod features;
pub mod gossip;
pub mod http;
pub mod ranking;
pub mod selector;
pub mod settings;
pub mod sharing;
pub mod types;

pub use client::{Client, ConnectionState, RequestContext};
pub use error::{ClientError, SettingsError};
pub use features::{ServerFeatures, SupportedMethod};
pub use selector::ChannelInfo;
pub use settings::ClientSettings;
pub use types::{
    ClusterInfo, Endpoint, MemberInfo, NodePreference, NodeState, ReconnectionRequired,
};
