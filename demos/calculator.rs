//! Two callees and one caller: addition answered directly, multiplication
//! passed from the first callee to the second, with the product returned
//! straight to the caller.
//!
//! Run with `cargo run --example calculator`.

use passrpc::{Callee, Caller};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AddArg {
    x: i64,
    y: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MulArg {
    x: i64,
    y: i64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let worker = Callee::new(0);
    worker.implement_always(|arg: MulArg| async move { arg.x * arg.y });
    let worker_addr = worker.start().await?.to_string();

    let front = Callee::new(0);
    front.implement_always(|arg: AddArg| async move { arg.x + arg.y });
    front.implement_pass(move |arg: MulArg, pass| {
        let worker_addr = worker_addr.clone();
        async move {
            // hand multiplication over; the worker replies to the caller
            pass.pass(&worker_addr, arg).await.expect("pass failed");
            None::<i64>
        }
    });
    let front_addr = front.start().await?.to_string();

    let caller = Caller::new(0);
    let add = caller.declare::<AddArg, i64>(Duration::from_secs(1));
    let mul = caller.declare::<MulArg, i64>(Duration::from_secs(1));
    caller.start().await?;

    let sum = add.call(&front_addr, AddArg { x: 1, y: 2 }).await?;
    println!("1 + 2 = {sum}");

    let product = mul.call(&front_addr, MulArg { x: 3, y: 4 }).await?;
    println!("3 * 4 = {product}");

    caller.stop().await;
    front.stop().await;
    worker.stop().await;
    Ok(())
}
