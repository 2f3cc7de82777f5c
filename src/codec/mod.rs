//! Codec module - XML encoding/decoding for protocol operations.
//!
//! This module maps typed request values to operation XML bodies and
//! decodes server messages back:
//!
//! - [`encode`] - body construction, including the presence-boolean and
//!   identifier-as-tag-name special cases
//! - [`envelope`] - the `<rpc>`/`<rpc-reply>`/`<hello>`/`<notification>`
//!   envelopes and `<rpc-error>` extraction
//! - [`filter`] - the constrained path-expression to subtree-filter
//!   translator

pub mod encode;
pub mod envelope;
pub mod filter;

pub use encode::BodyBuilder;
pub use envelope::{
    parse_hello, parse_message, wrap_rpc, HelloMessage, Notification, RpcReply, ServerMessage,
    BASE_1_0, CAP_BASE_1_0, CAP_BASE_1_1, NOTIFICATION_NS,
};
pub use filter::subtree_filter;
