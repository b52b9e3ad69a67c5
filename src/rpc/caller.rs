use crate::{
    codec::{self, wire_tag, Record, WireValue},
    message::{Receiver, SendError, Sender},
    rpc::{Call, Reply},
};
use std::{
    collections::HashMap,
    io,
    marker::PhantomData,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

type SlotMap = Arc<RwLock<HashMap<u64, oneshot::Sender<Record>>>>;

/// Issues remote calls and correlates the replies.
///
/// A caller owns a [`Sender`] for outbound calls and a [`Receiver`] on
/// `port` for inbound replies. Each in-flight call holds a one-shot slot
/// keyed by a unique id; the receiver's handler fills the slot when the
/// matching reply arrives, and a reply whose id has no slot (late, or never
/// issued) is dropped.
pub struct Caller {
    shared: Arc<Shared>,
}

struct Shared {
    configured_port: u16,
    bound_port: AtomicU16,
    sender: Sender,
    receiver: Receiver,
    next_id: AtomicU64,
    slots: SlotMap,
}

impl Caller {
    /// Create a caller whose replies arrive on `port` (0 picks a free port
    /// at [`start`](Caller::start)).
    pub fn new(port: u16) -> Self {
        let slots: SlotMap = Arc::default();
        let receiver = Receiver::new(port, {
            let slots = Arc::clone(&slots);
            move |_source, value| {
                let slots = Arc::clone(&slots);
                async move {
                    let Ok(reply) = value.downcast::<Reply>() else {
                        return;
                    };
                    let slot = slots.write().unwrap().remove(&reply.id);
                    match slot {
                        Some(slot) => {
                            // fails only if the issuer already gave up
                            let _ = slot.send(reply.ret);
                        }
                        None => debug!(id = reply.id, "dropping reply with no waiting slot"),
                    }
                }
            }
        });
        receiver.register::<Reply>();

        let sender = Sender::new();
        sender.register::<Call>();

        Self {
            shared: Arc::new(Shared {
                configured_port: port,
                bound_port: AtomicU16::new(port),
                sender,
                receiver,
                next_id: AtomicU64::new(0),
                slots,
            }),
        }
    }

    /// Declare a remote procedure taking `A` and returning `R`, with a
    /// per-call timeout. Registers `A` for sending and `R` for receiving,
    /// and hands back a cloneable callable bound to this caller.
    pub fn declare<A, R>(&self, timeout: Duration) -> RemoteFn<A, R>
    where
        A: WireValue,
        R: WireValue,
    {
        self.shared.sender.register::<A>();
        self.shared.receiver.register::<R>();
        RemoteFn {
            shared: Arc::clone(&self.shared),
            timeout,
            _types: PhantomData,
        }
    }

    /// Start the reply receiver. Returns its bound address.
    pub async fn start(&self) -> io::Result<SocketAddr> {
        let addr = self.shared.receiver.start().await?;
        self.shared.bound_port.store(addr.port(), Ordering::SeqCst);
        Ok(addr)
    }

    /// Stop the reply receiver. In-flight calls will time out; the caller
    /// may be started again afterwards.
    pub async fn stop(&self) {
        self.shared.receiver.stop().await;
        self.shared
            .bound_port
            .store(self.shared.configured_port, Ordering::SeqCst);
    }
}

/// A declared remote procedure, invocable against any callee address.
/// Cheap to clone; all clones share the declaring caller's id space and
/// reply receiver.
pub struct RemoteFn<A, R> {
    shared: Arc<Shared>,
    timeout: Duration,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for RemoteFn<A, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            timeout: self.timeout,
            _types: PhantomData,
        }
    }
}

impl<A, R> RemoteFn<A, R>
where
    A: WireValue,
    R: WireValue,
{
    /// Send `arg` to the callee at `addr` and wait for the typed reply.
    ///
    /// Returns [`CallError::Timeout`] if no reply arrives within the
    /// declared duration, and [`CallError::BadReturnType`] if one arrives
    /// carrying a type other than `R`. The reply may come from a different
    /// callee than `addr` when the call is passed along.
    pub async fn call(&self, addr: &str, arg: A) -> Result<R, CallError> {
        let shared = &*self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);

        let (slot, pending) = oneshot::channel();
        shared.slots.write().unwrap().insert(id, slot);

        let sent = async {
            let arg = shared.sender.encode(&arg)?;
            let call = Call {
                id,
                arg,
                caller_port: shared.bound_port.load(Ordering::SeqCst),
                caller_addr: String::new(),
                is_passed_call: false,
            };
            shared.sender.send(addr, &call).await
        }
        .await;
        if let Err(e) = sent {
            shared.slots.write().unwrap().remove(&id);
            return Err(CallError::Send(e));
        }

        match tokio::time::timeout(self.timeout, pending).await {
            Ok(Ok(ret)) => {
                // slot already removed by the deliverer
                if ret.type_tag() != wire_tag::<R>() {
                    return Err(CallError::BadReturnType {
                        expected: wire_tag::<R>(),
                        got: ret.type_tag().to_owned(),
                    });
                }
                codec::decode_payload(&ret).map_err(CallError::BadReturnPayload)
            }
            Ok(Err(_)) | Err(_) => {
                shared.slots.write().unwrap().remove(&id);
                Err(CallError::Timeout)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    /// The call never left, or could not reach the callee.
    #[error("sending call: {0}")]
    Send(#[from] SendError),

    /// No reply arrived within the declared timeout.
    #[error("timed out waiting for reply")]
    Timeout,

    /// A reply arrived carrying a type other than the declared return type.
    #[error("bad return type {got:?} (expecting {expected})")]
    BadReturnType { expected: &'static str, got: String },

    /// The reply carried the declared type but its payload did not parse.
    #[error("decoding return value: {0}")]
    BadReturnPayload(#[source] bincode::Error),
}
