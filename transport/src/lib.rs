//! # Transport
//!
//! Owns the single TCP connection between the two peers of a versus session
//! and turns everything that happens on it into [`TransportEvent`]s.
//!
//! ## Roles
//! The Server endpoint binds, waits up to 30s for the first peer and then
//! stops listening. The Client endpoint connects with a 5s limit. After the
//! handshake both behave identically.
//!
//! ## Tasks per connection
//! - **Receive loop**: one frame at a time; PING/PONG are handled here and
//!   never reach the application
//! - **Writer**: the only code touching the write half, so heartbeat and
//!   application packets cannot interleave on the wire
//! - **Heartbeat**: PING every second, lag edge after 200ms of silence,
//!   disconnect after 5s
//!
//! ## Failure model
//! EOF, I/O errors, undecodable frames and silence each close the link and
//! produce exactly one `Disconnected` (or `Error` before the link existed).
//! Sends after that return `false` and are otherwise ignored.
//!
//! ```rust,no_run
//! use transport::{Endpoint, EndpointConfig, TransportEvent};
//! use shared::{Packet, DEFAULT_PORT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (endpoint, mut events) = Endpoint::new(EndpointConfig::server(DEFAULT_PORT));
//!     endpoint.start().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             TransportEvent::Connected { peer } => {
//!                 println!("peer {} joined", peer);
//!                 endpoint.send(Packet::ready());
//!             }
//!             TransportEvent::Disconnected(reason) | TransportEvent::Error(reason) => {
//!                 println!("link ended: {}", reason);
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod framing;
pub mod monitor;

pub use config::{parse_peer_addr, peer_addr, EndpointConfig, LinkConfig};
pub use endpoint::{ConnectionState, Endpoint, EventReceiver, TransportEvent};
pub use error::TransportError;
pub use monitor::{LinkMonitor, LinkSignal};
