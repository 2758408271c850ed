//! # Mock BattlEye RCon Server
//!
//! This library provides a scriptable stand-in for a BattlEye RCon server. It
//! speaks the same wire format as a real game server and is used by the
//! integration tests and for trying the client by hand.
//!
//! ## Core Responsibilities
//!
//! ### Login
//! Accepts or rejects the password, or stays silent to simulate a server that
//! is down.
//!
//! ### Commands
//! Answers a small fixed command set:
//! - `getplayers`: a single-datagram player listing
//! - `getplayersmulti`: the same listing split across ten parts, optionally
//!   shuffled
//! - the empty command: a keep-alive, answered with an empty response unless
//!   told otherwise
//! - anything else: `Unknown command`
//!
//! ### Console Load
//! After a successful login the server can push a stream of console
//! messages, repeated or with broken checksums, and finish with the
//! out-of-band shutdown signal that ends the client's session.
//!
//! ## Module Organization
//!
//! ### Setup Module (`setup`)
//! The behaviour switches ([`ServerSetup`]) and the counters the server keeps
//! while it runs ([`ServerMetrics`]).
//!
//! ### Network Module (`network`)
//! The UDP server loop and the console load task.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{MockServer, ServerSetup};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let setup = ServerSetup {
//!         console_messages: 100,
//!         ..ServerSetup::default()
//!     };
//!     let server = MockServer::bind("127.0.0.1:2302", setup).await?;
//!
//!     // Serves one session; returns after the shutdown signal was sent.
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod setup;

pub use network::{MockServer, MockServerHandle};
pub use setup::{ServerMetrics, ServerMetricsSnapshot, ServerSetup};
