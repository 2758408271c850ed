//! # BattlEye RCon Client Library
//!
//! This library implements the client side of the BattlEye RCon protocol, the
//! UDP remote console used to administer game servers. It logs in, sends
//! commands, collects their responses and receives the console messages the
//! server pushes on its own.
//!
//! ## Architecture Overview
//!
//! UDP gives no delivery, ordering or fragmentation guarantees, so the client
//! provides them itself:
//!
//! ### Request Correlation
//! Every command carries a one-byte sequence number that the server echoes
//! in its response. Requests are registered before they are sent and the
//! caller waits on the registration with a timeout.
//!
//! ### Duplicate Suppression
//! The server retransmits console messages and responses it believes were
//! lost. The client acknowledges every console message, including repeats,
//! but processes each sequence number once.
//!
//! ### Reassembly
//! Large command responses arrive as numbered parts in any order. They are
//! stored by index and joined once every part is present.
//!
//! ### Liveness
//! A quiet session is probed with empty commands. If none of them is
//! answered the session ends with [`ShutdownReason::NoResponseFromServer`].
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The [`RconClient`] facade: connect, send commands, disconnect, and the
//! console message and connection problem channels.
//!
//! ### Engine Module (`engine`)
//! The receive loop and the inbound pipeline: length check, sequence
//! pre-processing, checksum verification, decoding and dispatch.
//!
//! ### Pending Module (`pending`)
//! The registry that pairs outstanding requests with their responses.
//!
//! ### Multipart, Sequence and Keepalive Modules
//! Reassembly of split responses, duplicate detection, and the keep-alive
//! state machine. None of them perform I/O.
//!
//! ### Transport Module (`transport`)
//! The datagram pipe the engine runs over, UDP in production and an
//! in-memory channel pair in tests.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::{ClientConfig, RconClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("127.0.0.1:2302", "secret");
//! let mut client = RconClient::bind(config).await?;
//! let mut messages = client.take_messages().expect("messages not taken yet");
//!
//! client.connect().await?;
//!
//! let result = client.send_command("players").await?;
//! if result.succeeded {
//!     println!("{}", result.body);
//! }
//!
//! while let Ok(message) = messages.try_recv() {
//!     println!("console: {}", message.text);
//! }
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod keepalive;
pub mod metrics;
pub mod multipart;
pub mod network;
pub mod pending;
pub mod sequence;
pub mod transport;

pub use config::ClientConfig;
pub use error::{RconError, RconResult};
pub use events::{CommandResult, ConnectionProblem, ConsoleMessage, SessionState, ShutdownReason};
pub use metrics::MetricsSnapshot;
pub use network::RconClient;
pub use pending::PendingResponse;
