//! Call/reply RPC with transparent forwarding, layered on [`message`].
//!
//! A [`Caller`] declares typed remote procedures and invokes them by
//! address, blocking until the reply arrives or a timeout elapses. A
//! [`Callee`] implements procedures keyed by argument type; a handler can
//! answer directly or hand the still-pending call to another callee via
//! [`PassHandle::pass`], in which case the eventual reply goes straight back
//! to the original caller without revisiting any intermediate hop.
//!
//! [`message`]: crate::message

pub mod callee;
pub mod caller;

use crate::codec::Record;
use serde::{Deserialize, Serialize};

pub use callee::{Callee, PassHandle};
pub use caller::{CallError, Caller, RemoteFn};

/// One remote call on the wire. `caller_port` names the caller's listening
/// port (its outbound ephemeral port says nothing); `caller_addr` is empty
/// until the call is passed onward, after which it carries the original
/// return address unchanged across any number of hops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Call {
    pub id: u64,
    pub arg: Record,
    pub caller_port: u16,
    pub caller_addr: String,
    pub is_passed_call: bool,
}

/// The reply to one remote call, correlated by id.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Reply {
    pub id: u64,
    pub ret: Record,
}
