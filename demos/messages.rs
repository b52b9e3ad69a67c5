//! The bare transport layer: two receivers with different registered type
//! sets, one sender. A value of a type the target never registered is
//! silently not delivered.
//!
//! Run with `cargo run --example messages`.

use passrpc::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    body: String,
    priority: i32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let numbers = Receiver::new(0, |source, value| async move {
        println!("numbers receiver got {value:?} from {source}");
    });
    numbers.register::<i64>();
    numbers.register::<Note>();
    let numbers_addr = numbers.start().await?.to_string();

    let strings = Receiver::new(0, |source, value| async move {
        println!("strings receiver got {value:?} from {source}");
    });
    strings.register::<String>();
    let strings_addr = strings.start().await?.to_string();

    let sender = Sender::new();
    sender.register::<String>();
    sender.register::<i64>();
    sender.register::<Note>();

    sender.send(&strings_addr, &"a string".to_string()).await?;
    sender.send(&numbers_addr, &123i64).await?;
    sender
        .send(
            &numbers_addr,
            &Note {
                body: "hello".into(),
                priority: 1,
            },
        )
        .await?;

    // the strings receiver never registered Note, so this goes nowhere
    sender
        .send(
            &strings_addr,
            &Note {
                body: "lost".into(),
                priority: 1,
            },
        )
        .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    strings.stop().await;
    numbers.stop().await;
    Ok(())
}
