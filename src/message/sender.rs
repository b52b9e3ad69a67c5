use crate::codec::{self, wire_tag, Record, WireValue};
use async_bincode::tokio::AsyncBincodeStream;
use futures::SinkExt;
use std::{
    any::TypeId,
    collections::HashSet,
    io,
    sync::Mutex,
};
use thiserror::Error;
use tokio::{
    io::BufStream,
    net::{lookup_host, TcpStream},
};

/// Sends values of a registered set of types, one fresh connection and one
/// record per send.
#[derive(Default)]
pub struct Sender {
    admitted: Mutex<HashSet<TypeId>>,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a type for sending. Idempotent; legal at any time.
    pub fn register<T: WireValue>(&self) {
        self.admitted.lock().unwrap().insert(TypeId::of::<T>());
    }

    /// Encode an admitted value into a record. Fails with
    /// [`SendError::UnregisteredType`] before touching the network.
    pub(crate) fn encode<T: WireValue>(&self, value: &T) -> Result<Record, SendError> {
        if !self.admitted.lock().unwrap().contains(&TypeId::of::<T>()) {
            return Err(SendError::UnregisteredType(wire_tag::<T>()));
        }
        codec::encode_record(value).map_err(SendError::Encode)
    }

    /// Encode `value` and send it to `addr` over a fresh TCP connection.
    /// The connection carries exactly one record and is closed afterwards.
    pub async fn send<T: WireValue>(&self, addr: &str, value: &T) -> Result<(), SendError> {
        let record = self.encode(value)?;
        self.send_record(addr, record).await
    }

    pub(crate) async fn send_record(&self, addr: &str, record: Record) -> Result<(), SendError> {
        let mut hosts = lookup_host(addr).await.map_err(|source| SendError::Resolve {
            addr: addr.to_owned(),
            source,
        })?;
        let target = hosts.next().ok_or_else(|| SendError::Resolve {
            addr: addr.to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
        })?;

        let stream = TcpStream::connect(target)
            .await
            .map_err(|source| SendError::Connect {
                addr: addr.to_owned(),
                source,
            })?;

        let mut framed =
            AsyncBincodeStream::<_, Record, Record, _>::from(BufStream::new(stream)).for_async();
        framed.send(record).await.map_err(SendError::Encode)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    /// The value's type was never [`Sender::register`]ed.
    #[error("unregistered type {0}")]
    UnregisteredType(&'static str),

    /// The target address did not resolve to any TCP endpoint.
    #[error("resolving {addr}: {source}")]
    Resolve { addr: String, source: io::Error },

    /// Connecting to the resolved endpoint failed.
    #[error("connecting to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    /// Serializing or writing the record failed.
    #[error("encoding record: {0}")]
    Encode(#[source] bincode::Error),
}
