use passrpc::{AnyValue, Receiver, SendError, Sender};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Barrier},
    time::timeout,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    body: String,
    priority: i32,
}

fn collecting_receiver(port: u16) -> (Receiver, mpsc::UnboundedReceiver<AnyValue>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let receiver = Receiver::new(port, move |_source: SocketAddr, value| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(value);
        }
    });
    (receiver, rx)
}

#[tokio::test]
async fn dispatches_by_runtime_type() {
    let (r1, mut r1_inbox) = collecting_receiver(0);
    r1.register::<i64>();
    r1.register::<Note>();
    let r1_addr = r1.start().await.unwrap().to_string();

    let (r2, mut r2_inbox) = collecting_receiver(0);
    r2.register::<String>();
    let r2_addr = r2.start().await.unwrap().to_string();

    let sender = Sender::new();
    sender.register::<String>();
    sender.register::<i64>();
    sender.register::<Note>();

    sender.send(&r2_addr, &"a string".to_string()).await.unwrap();
    sender.send(&r1_addr, &123i64).await.unwrap();
    let note = Note {
        body: "to r1".into(),
        priority: 2,
    };
    sender.send(&r1_addr, &note).await.unwrap();

    // r2 has not registered Note, so this one is never dispatched
    let stray = Note {
        body: "to r2".into(),
        priority: 2,
    };
    sender.send(&r2_addr, &stray).await.unwrap();

    let got = timeout(Duration::from_secs(1), r2_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(got.tag().ends_with("String"), "unexpected tag {}", got.tag());
    assert_eq!(got.downcast::<String>().unwrap(), "a string");
    assert!(
        timeout(Duration::from_millis(200), r2_inbox.recv())
            .await
            .is_err(),
        "unregistered type must not be dispatched"
    );

    let mut ints = Vec::new();
    let mut notes = Vec::new();
    for _ in 0..2 {
        let value = timeout(Duration::from_secs(1), r1_inbox.recv())
            .await
            .unwrap()
            .unwrap();
        if value.is::<i64>() {
            ints.push(value.downcast::<i64>().unwrap());
        } else {
            notes.push(value.downcast::<Note>().unwrap());
        }
    }
    assert_eq!(ints, [123]);
    assert_eq!(notes, [note]);

    r1.stop().await;
    r2.stop().await;
}

#[tokio::test]
async fn unregistered_send_fails_without_connecting() {
    let sender = Sender::new();
    // the address is not even listening; the admission check must reject
    // the value before any connection attempt could fail differently
    let err = sender
        .send("127.0.0.1:1", &Note {
            body: "nope".into(),
            priority: 0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::UnregisteredType(_)), "{err}");
}

#[tokio::test]
async fn resolve_failure_is_surfaced() {
    let sender = Sender::new();
    sender.register::<i64>();
    let err = sender.send("no-such-host.invalid:80", &1i64).await.unwrap_err();
    assert!(matches!(err, SendError::Resolve { .. }), "{err}");
}

#[tokio::test]
async fn register_is_idempotent_and_legal_while_running() {
    let (receiver, mut inbox) = collecting_receiver(0);
    receiver.register::<i64>();
    receiver.register::<i64>();
    let addr = receiver.start().await.unwrap().to_string();

    let sender = Sender::new();
    sender.register::<i64>();
    sender.register::<i64>();
    sender.send(&addr, &7i64).await.unwrap();
    let got = timeout(Duration::from_secs(1), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.downcast::<i64>().unwrap(), 7);

    // a type registered after start takes effect for subsequent records
    receiver.register::<String>();
    sender.register::<String>();
    sender.send(&addr, &"late".to_string()).await.unwrap();
    let got = timeout(Duration::from_secs(1), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.downcast::<String>().unwrap(), "late");

    receiver.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_and_addr_tracks_lifecycle() {
    let (receiver, mut inbox) = collecting_receiver(0);
    receiver.register::<i64>();

    assert_eq!(receiver.addr(), None);
    let addr = receiver.start().await.unwrap();
    assert_eq!(receiver.addr(), Some(addr));
    assert_eq!(receiver.start().await.unwrap(), addr);

    receiver.stop().await;
    receiver.stop().await;
    assert_eq!(receiver.addr(), None);

    // restart binds anew and keeps the registered set
    let addr = receiver.start().await.unwrap();
    let sender = Sender::new();
    sender.register::<i64>();
    sender.send(&addr.to_string(), &42i64).await.unwrap();
    let got = timeout(Duration::from_secs(1), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.downcast::<i64>().unwrap(), 42);

    receiver.stop().await;
}

#[tokio::test]
async fn stopped_receiver_releases_the_port() {
    let (receiver, _inbox) = collecting_receiver(0);
    receiver.register::<i64>();
    let addr = receiver.start().await.unwrap().to_string();
    receiver.stop().await;

    let sender = Sender::new();
    sender.register::<i64>();
    let err = sender.send(&addr, &1i64).await.unwrap_err();
    assert!(matches!(err, SendError::Connect { .. }), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handlers_run_concurrently() {
    // every handler parks on the barrier; the test only completes if all
    // three records are being handled at the same time
    let barrier = Arc::new(Barrier::new(3));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let receiver = Receiver::new(0, move |_source, value: AnyValue| {
        let barrier = Arc::clone(&barrier);
        let done_tx = done_tx.clone();
        async move {
            barrier.wait().await;
            let _ = done_tx.send(value.downcast::<i64>().unwrap());
        }
    });
    receiver.register::<i64>();
    let addr = receiver.start().await.unwrap().to_string();

    let sender = Sender::new();
    sender.register::<i64>();
    for n in 0..3i64 {
        sender.send(&addr, &n).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let n = timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .expect("handlers did not run concurrently")
            .unwrap();
        seen.push(n);
    }
    seen.sort_unstable();
    assert_eq!(seen, [0, 1, 2]);

    receiver.stop().await;
}
