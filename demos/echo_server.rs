//! Echo Server Example
//!
//! Sends every message back to the client that produced it. Try it with
//! `nc 127.0.0.1 8080` or any WebSocket client pointed at `ws://127.0.0.1:8080/`.

use servertalk::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    servertalk::init_logging()?;

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let server = Server::builder()
        .bind("127.0.0.1:8080")
        .should_stop(move || stop.load(Ordering::SeqCst))
        .on_message(|msg, conn, _server| async move {
            match conn.kind() {
                ConnectionKind::Line => {
                    let mut reply = msg.as_bytes().to_vec();
                    reply.push(b'\n');
                    conn.write(&reply).await;
                }
                ConnectionKind::WebSocket => {
                    conn.write(msg.as_bytes()).await;
                }
            }
        })
        .build()?;

    println!("Echo server listening on 127.0.0.1:8080");
    server.run().await?;
    println!("Echo server stopped");

    Ok(())
}
