//! Simple echo server example
//!
//! Line clients get their line back, WebSocket clients get a text frame.
//!
//! ```text
//! cargo run -p servertalk-server --example server_example
//! printf 'hello\n' | nc 127.0.0.1 8080
//! ```

use servertalk_server::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    servertalk_server::init_logging()?;

    let server = Server::builder()
        .bind("127.0.0.1:8080")
        .on_connect(|conn, server| async move {
            server.log(format!("{} connected from {}", conn.kind(), conn.remote_addr()));
        })
        .on_message(|msg, conn, _server| async move {
            let mut reply = msg.as_bytes().to_vec();
            if conn.kind() == ConnectionKind::Line {
                reply.push(b'\n');
            }
            conn.write(&reply).await;
        })
        .on_log(|line| println!("{}", line))
        .build()?;

    println!("Listening on 127.0.0.1:8080 (line and ws://)");
    server.run().await?;

    Ok(())
}
