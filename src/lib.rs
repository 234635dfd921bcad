//! # oro-client
//!
//! Async Rust client for the ORO/minimalKB knowledge base server's
//! line-oriented socket protocol.
//!
//! ## Architecture
//!
//! - **Protocol**: `#end#`-terminated text messages with JSON payload
//!   lines, decoded into response and event frames.
//! - **Transport**: one TCP connection, a read loop that reassembles
//!   frames and a writer task that drains the outbound queue.
//! - **Correlator**: the single-flight `call` primitive - one request in
//!   flight at a time, its response is the next response frame.
//! - **Dispatcher**: a background loop routing event notifications to
//!   registered callbacks or to a poll queue.
//!
//! ## Example
//!
//! ```ignore
//! use oro_client::Kb;
//!
//! #[tokio::main]
//! async fn main() -> oro_client::Result<()> {
//!     let kb = Kb::connect("localhost", 6969).await?;
//!
//!     kb.add(&["alfred rdf:type Human", "alfred isIn room"]).await?;
//!     if kb.contains("* isIn room").await? {
//!         println!("somebody is in the room");
//!     }
//!
//!     kb.subscribe(
//!         &["?o isIn kitchen"],
//!         Some(Box::new(|v| println!("entered the kitchen: {v}"))),
//!     )
//!     .await?;
//!
//!     kb.close().await
//! }
//! ```
//!
//! The library never installs a `tracing` subscriber; logging is a no-op
//! until the embedding application sets one up.

pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod subscribe;
pub mod transport;

pub mod writer;

mod query;
mod session;

pub use dispatcher::{EventCallback, PolledEvents};
pub use error::{KbError, Result};
pub use protocol::{Frame, FrameBuffer, DEFAULT_PORT};
pub use session::{Kb, KbConfig};
pub use subscribe::{EventType, SubscribeOptions, Trigger};
pub use transport::ConnectionState;

pub use serde_json::Value;
