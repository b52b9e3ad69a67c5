//! Typed message passing over TCP, with a call/reply RPC layer that
//! supports transparently passing a call from one callee to another while
//! the reply returns directly to the original caller.
//!
//! The [`message`] layer moves values of registered types between peers and
//! dispatches inbound values by their runtime type. The [`rpc`] layer adds
//! typed remote procedures on top: a [`Caller`] declares them and invokes
//! them by address, a [`Callee`] implements them keyed by argument type and
//! may forward a pending call onward via [`PassHandle::pass`].
//!
//! ```no_run
//! use passrpc::{Callee, Caller};
//! use std::time::Duration;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct AddArg { x: i64, y: i64 }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let callee = Callee::new(0);
//! callee.implement_always(|arg: AddArg| async move { arg.x + arg.y });
//! let callee_addr = callee.start().await?.to_string();
//!
//! let caller = Caller::new(0);
//! let add = caller.declare::<AddArg, i64>(Duration::from_secs(1));
//! caller.start().await?;
//!
//! let sum = add.call(&callee_addr, AddArg { x: 1, y: 2 }).await?;
//! assert_eq!(sum, 3);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod message;
pub mod rpc;

pub use codec::{AnyValue, CodecError, Record, WireValue};
pub use message::{Receiver, SendError, Sender};
pub use rpc::{CallError, Callee, Caller, PassHandle, RemoteFn};
