use crate::{
    codec::{AnyValue, Record, TypeRegistry, WireValue},
    message::Handler,
};
use async_bincode::tokio::AsyncBincodeStream;
use futures::{future::BoxFuture, StreamExt};
use std::{
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};
use tokio::{
    io::BufStream,
    net::{TcpListener, TcpStream},
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Listens on a port and dispatches every inbound value of a registered type
/// to its handler. Each connection gets a decoder task of its own; each
/// admitted record gets a handler task of its own, so handlers run
/// concurrently and complete in no particular order.
pub struct Receiver {
    local_addr: SocketAddr,
    handler: Handler,
    registry: Arc<RwLock<TypeRegistry>>,
    dispatching: Arc<AtomicBool>,
    running: Mutex<Option<Running>>,
    bound: RwLock<Option<SocketAddr>>,
}

struct Running {
    addr: SocketAddr,
    quit: oneshot::Sender<()>,
    acceptor: JoinHandle<()>,
}

impl Receiver {
    /// Create a receiver bound-to-be on `port` (0 picks a free port at
    /// [`start`](Receiver::start)). Does no network work. The handler runs
    /// on its own task for every admitted inbound value.
    pub fn new<H, Fut>(port: u16, handler: H) -> Self
    where
        H: Fn(SocketAddr, AnyValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |addr, value| -> BoxFuture<'static, ()> {
            Box::pin(handler(addr, value))
        });
        Self {
            local_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            handler,
            registry: Arc::new(RwLock::new(TypeRegistry::default())),
            dispatching: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
            bound: RwLock::new(None),
        }
    }

    /// Accept a type for dispatch. Idempotent; legal while running, in which
    /// case it takes effect for subsequent records.
    pub fn register<T: WireValue>(&self) {
        self.registry.write().unwrap().register::<T>();
    }

    /// The currently bound address, or `None` when stopped.
    pub fn addr(&self) -> Option<SocketAddr> {
        *self.bound.read().unwrap()
    }

    /// Bind the listener and begin accepting. Returns the actual bound
    /// address. A no-op returning the current address if already running.
    pub async fn start(&self) -> io::Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Ok(running.addr);
        }

        let listener = TcpListener::bind(self.local_addr).await?;
        let addr = listener.local_addr()?;
        let (quit_tx, quit_rx) = oneshot::channel();
        self.dispatching.store(true, Ordering::SeqCst);

        let registry = Arc::clone(&self.registry);
        let handler = Arc::clone(&self.handler);
        let dispatching = Arc::clone(&self.dispatching);
        let acceptor = tokio::spawn(accept_loop(listener, quit_rx, registry, handler, dispatching));

        *running = Some(Running {
            addr,
            quit: quit_tx,
            acceptor,
        });
        *self.bound.write().unwrap() = Some(addr);
        debug!(%addr, "receiver started");
        Ok(addr)
    }

    /// Stop accepting and release the listener. Waits for the acceptor to
    /// exit; already-running handler tasks are left to finish on their own,
    /// and open connections' decoders terminate at their next read error.
    /// No new handler is spawned once this returns. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        self.dispatching.store(false, Ordering::SeqCst);
        let _ = running.quit.send(());
        let _ = running.acceptor.await;
        *self.bound.write().unwrap() = None;
        debug!(addr = %running.addr, "receiver stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut quit: oneshot::Receiver<()>,
    registry: Arc<RwLock<TypeRegistry>>,
    handler: Handler,
    dispatching: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            _ = &mut quit => return,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                tokio::spawn(decode_connection(
                    stream,
                    peer,
                    Arc::clone(&registry),
                    Arc::clone(&handler),
                    Arc::clone(&dispatching),
                ));
            }
        }
    }
}

/// Reads records off one connection until EOF or the first decode error,
/// spawning a handler task per admitted record. A record of an unregistered
/// type is a decode error here: without a registered decoder there is
/// nothing to dispatch, so the value is dropped and the connection's decoder
/// ends. Other connections are unaffected.
async fn decode_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<RwLock<TypeRegistry>>,
    handler: Handler,
    dispatching: Arc<AtomicBool>,
) {
    let mut records =
        AsyncBincodeStream::<_, Record, Record, _>::from(BufStream::new(stream)).for_async();
    while let Some(next) = records.next().await {
        let record = match next {
            Ok(record) => record,
            Err(e) => {
                debug!(%peer, error = %e, "connection decoder terminating");
                return;
            }
        };
        let decoded = registry.read().unwrap().decode(&record);
        match decoded {
            Ok(value) => {
                if !dispatching.load(Ordering::SeqCst) {
                    return;
                }
                tokio::spawn(handler(peer, value));
            }
            Err(e) => {
                debug!(%peer, error = %e, "dropping record, connection decoder terminating");
                return;
            }
        }
    }
}
