//! Typed message passing over TCP.
//!
//! A [`Sender`] opens a fresh connection per value and writes one
//! self-describing record; a [`Receiver`] listens on a port, decodes records
//! off each inbound connection, and dispatches every value whose type it has
//! registered to its handler on a task of its own. Dispatch is keyed by the
//! runtime type of the received value, so both ends must register a type
//! before exchanging values of it.

pub mod receiver;
pub mod sender;

use crate::codec::AnyValue;
use futures::future::BoxFuture;
use std::{net::SocketAddr, sync::Arc};

pub use receiver::Receiver;
pub use sender::{SendError, Sender};

/// The receiver-side callback: invoked with the TCP peer address and the
/// decoded value, on its own task, for every admitted inbound record.
pub(crate) type Handler = Arc<dyn Fn(SocketAddr, AnyValue) -> BoxFuture<'static, ()> + Send + Sync>;
