use crate::{
    codec::{self, wire_tag, Record, WireValue},
    message::{Receiver, SendError, Sender},
    rpc::{Call, Reply},
};
use futures::future::BoxFuture;
use std::{
    collections::HashMap,
    future::Future,
    io,
    marker::PhantomData,
    net::SocketAddr,
    sync::{Arc, RwLock},
};
use tracing::{debug, warn};

type HandlerTable = Arc<RwLock<HashMap<&'static str, StoredHandler>>>;

/// How a stored handler concludes a call.
#[derive(Debug, Clone, Copy)]
enum HandlerKind {
    /// Always produces a reply.
    AlwaysReturn,
    /// May reply, or may pass the call onward and stay silent.
    MayReturn,
}

#[derive(Clone)]
struct StoredHandler {
    kind: HandlerKind,
    invoke: Arc<dyn Fn(CallContext) -> BoxFuture<'static, ()> + Send + Sync>,
}

/// Everything a handler invocation needs from the envelope: the call id,
/// the still-encoded argument, and where the reply must go.
struct CallContext {
    id: u64,
    arg: Record,
    caller_port: u16,
    return_addr: String,
}

/// Implements remote procedures, keyed by argument type.
///
/// Inbound [`Call`]s are dispatched to the handler registered for the
/// argument's type; a call whose argument type has no handler is dropped
/// without a reply, which the caller observes as a timeout.
pub struct Callee {
    sender: Arc<Sender>,
    receiver: Receiver,
    handlers: HandlerTable,
}

impl Callee {
    /// Create a callee listening for calls on `port` (0 picks a free port
    /// at [`start`](Callee::start)).
    pub fn new(port: u16) -> Self {
        let sender = Arc::new(Sender::new());
        let handlers: HandlerTable = Arc::default();

        let receiver = Receiver::new(port, {
            let handlers = Arc::clone(&handlers);
            move |source, value| {
                let handlers = Arc::clone(&handlers);
                async move {
                    let Ok(call) = value.downcast::<Call>() else {
                        return;
                    };
                    handle_call(source, call, &handlers).await;
                }
            }
        });
        receiver.register::<Call>();
        sender.register::<Call>();
        sender.register::<Reply>();

        Self {
            sender,
            receiver,
            handlers,
        }
    }

    /// Register a procedure that always replies: `f` takes the argument and
    /// produces the return value. Idempotent per argument type in the sense
    /// that a later registration for the same `A` replaces the earlier one.
    pub fn implement_always<A, R, F, Fut>(&self, f: F)
    where
        A: WireValue,
        R: WireValue + Sync,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.register_types::<A, R>();
        let sender = Arc::clone(&self.sender);
        let f = Arc::new(f);
        let invoke = Arc::new(move |ctx: CallContext| -> BoxFuture<'static, ()> {
            let sender = Arc::clone(&sender);
            let f = Arc::clone(&f);
            Box::pin(async move {
                let Some(arg) = decode_arg::<A>(&ctx) else {
                    return;
                };
                let ret = f(arg).await;
                send_reply(&sender, ctx.id, &ret, &ctx.return_addr).await;
            })
        });
        self.store::<A>(HandlerKind::AlwaysReturn, invoke);
    }

    /// Register a procedure that may reply or may pass the call onward:
    /// `f` takes the argument and a [`PassHandle`]. Yielding `Some(ret)`
    /// sends a reply; yielding `None` sends nothing, leaving whichever
    /// callee the call was passed to (if any) to answer. Passing *and*
    /// yielding `Some` sends both a forwarded call and a direct reply;
    /// choose one responder per call.
    pub fn implement_pass<A, R, F, Fut>(&self, f: F)
    where
        A: WireValue,
        R: WireValue + Sync,
        F: Fn(A, PassHandle<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<R>> + Send + 'static,
    {
        self.register_types::<A, R>();
        let sender = Arc::clone(&self.sender);
        let f = Arc::new(f);
        let invoke = Arc::new(move |ctx: CallContext| -> BoxFuture<'static, ()> {
            let sender = Arc::clone(&sender);
            let f = Arc::clone(&f);
            Box::pin(async move {
                let Some(arg) = decode_arg::<A>(&ctx) else {
                    return;
                };
                let pass = PassHandle {
                    sender: Arc::clone(&sender),
                    id: ctx.id,
                    caller_port: ctx.caller_port,
                    return_addr: ctx.return_addr.clone(),
                    _arg: PhantomData,
                };
                if let Some(ret) = f(arg, pass).await {
                    send_reply(&sender, ctx.id, &ret, &ctx.return_addr).await;
                }
            })
        });
        self.store::<A>(HandlerKind::MayReturn, invoke);
    }

    fn register_types<A: WireValue, R: WireValue>(&self) {
        self.receiver.register::<A>();
        self.sender.register::<A>();
        self.sender.register::<R>();
    }

    fn store<A: WireValue>(
        &self,
        kind: HandlerKind,
        invoke: Arc<dyn Fn(CallContext) -> BoxFuture<'static, ()> + Send + Sync>,
    ) {
        self.handlers
            .write()
            .unwrap()
            .insert(wire_tag::<A>(), StoredHandler { kind, invoke });
    }

    /// Start listening for calls. Returns the bound address.
    pub async fn start(&self) -> io::Result<SocketAddr> {
        self.receiver.start().await
    }

    /// Stop listening. Handlers already running are left to finish; the
    /// callee may be started again afterwards.
    pub async fn stop(&self) {
        self.receiver.stop().await;
    }
}

/// Resolve where the reply must go, find a handler for the argument type,
/// and run it. Runs inside the per-record task the receiver spawned, so
/// long handlers don't hold up other calls.
async fn handle_call(source: SocketAddr, call: Call, handlers: &HandlerTable) {
    let return_addr = if call.is_passed_call {
        call.caller_addr.clone()
    } else {
        // the peer's ephemeral port is useless; recombine its host with the
        // listening port the caller told us about
        SocketAddr::new(source.ip(), call.caller_port).to_string()
    };

    let stored = handlers.read().unwrap().get(call.arg.type_tag()).cloned();
    let Some(stored) = stored else {
        debug!(
            id = call.id,
            arg = call.arg.type_tag(),
            "dropping call with no handler for argument type"
        );
        return;
    };

    debug!(
        id = call.id,
        arg = call.arg.type_tag(),
        kind = ?stored.kind,
        passed = call.is_passed_call,
        "dispatching call"
    );
    let ctx = CallContext {
        id: call.id,
        arg: call.arg,
        caller_port: call.caller_port,
        return_addr,
    };
    (stored.invoke)(ctx).await;
}

fn decode_arg<A: WireValue>(ctx: &CallContext) -> Option<A> {
    match codec::decode_payload(&ctx.arg) {
        Ok(arg) => Some(arg),
        Err(e) => {
            debug!(id = ctx.id, error = %e, "dropping call with undecodable argument");
            None
        }
    }
}

async fn send_reply<R: WireValue>(sender: &Sender, id: u64, ret: &R, return_addr: &str) {
    let reply = match sender.encode(ret) {
        Ok(ret) => Reply { id, ret },
        Err(e) => {
            warn!(id, error = %e, "cannot encode reply");
            return;
        }
    };
    if let Err(e) = sender.send(return_addr, &reply).await {
        warn!(id, addr = return_addr, error = %e, "sending reply failed");
    }
}

/// Hands a still-pending call to another callee, keeping the original
/// caller as the reply target. Constructed per dispatch and given to
/// [`Callee::implement_pass`] handlers; may be used any number of times,
/// and cloned into spawned work if needed.
pub struct PassHandle<A> {
    sender: Arc<Sender>,
    id: u64,
    caller_port: u16,
    return_addr: String,
    _arg: PhantomData<fn(A)>,
}

impl<A> Clone for PassHandle<A> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
            id: self.id,
            caller_port: self.caller_port,
            return_addr: self.return_addr.clone(),
            _arg: PhantomData,
        }
    }
}

impl<A: WireValue> PassHandle<A> {
    /// Forward the call to `addr` with a rewritten argument. The forwarded
    /// envelope keeps the original call id and return address, so the next
    /// callee replies directly to the original caller.
    pub async fn pass(&self, addr: &str, arg: A) -> Result<(), SendError> {
        let arg = self.sender.encode(&arg)?;
        let call = Call {
            id: self.id,
            arg,
            caller_port: self.caller_port,
            caller_addr: self.return_addr.clone(),
            is_passed_call: true,
        };
        self.sender.send(addr, &call).await
    }
}
