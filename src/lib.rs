//! Async client for the RFC 6241 network configuration protocol.
//!
//! The crate runs request/reply RPC exchanges and asynchronous event
//! notifications over a single persistent byte stream the caller
//! provides. Transport establishment (SSH, TLS) is out of scope; hand
//! any connected `AsyncRead + AsyncWrite` stream to
//! [`Session::handshake`].
//!
//! # Architecture
//!
//! ```text
//! get_config / edit_config / commit / ...   (ops)
//!                  │
//!            Session::call          ── message-id allocation,
//!                  │                   pending-reply correlation
//!        ┌─────────┴─────────┐
//!   writer task          router task  ── demultiplexes replies and
//!        │                   │           notifications
//!     encoder             decoder     ── end-marker or chunked framing
//!        └───────► stream ◄──┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use netconf_client::ops::{Datastore, GetConfigOptions, Source};
//! use netconf_client::{Session, SessionConfig};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> netconf_client::Result<()> {
//! let stream = TcpStream::connect("192.0.2.1:830").await?;
//! let session = Session::handshake(stream, SessionConfig::default()).await?;
//!
//! let running = session
//!     .get_config(
//!         Source::Datastore(Datastore::Running),
//!         GetConfigOptions::default(),
//!     )
//!     .await?;
//! println!("{running}");
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod ops;
mod session;
mod writer;

pub use codec::envelope::{Notification, RpcReply};
pub use error::{NetconfError, Result, RpcError, Severity};
pub use frame::FramingMode;
pub use session::{Capabilities, Session, SessionConfig};
