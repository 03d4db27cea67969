//! Chat Server Example
//!
//! Every message is relayed to all other connected clients, whichever
//! protocol they speak. `/nick NAME` changes the sender's display name, which
//! lives in the connection context.

use servertalk::prelude::*;

async fn send_line(conn: &ConnectionHandle, text: &str) {
    match conn.kind() {
        ConnectionKind::Line => conn.write(format!("{}\n", text).as_bytes()).await,
        ConnectionKind::WebSocket => conn.write(text.as_bytes()).await,
    };
}

fn nickname(conn: &ConnectionHandle) -> String {
    match conn.context().get("nick") {
        Some(Value::String(nick)) => nick.clone(),
        _ => format!("user{}", conn.id()),
    }
}

async fn broadcast(server: &Server, from: u64, text: &str) {
    for other in server.connections() {
        if other.id() != from && !other.is_closed() {
            send_line(&other, text).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    servertalk::init_logging()?;

    let server = Server::builder()
        .bind("127.0.0.1:8080")
        .on_connect(|conn, server| async move {
            let nick = format!("user{}", conn.id());
            conn.context().set("nick", nick.clone());
            send_line(&conn, &format!("welcome, you are {}", nick)).await;
            broadcast(&server, conn.id(), &format!("* {} joined", nick)).await;
        })
        .on_message(|msg, conn, server| async move {
            let text = msg.to_string();
            if let Some(new_nick) = text.strip_prefix("/nick ") {
                let old = nickname(&conn);
                conn.context().set("nick", new_nick.trim());
                broadcast(&server, conn.id(), &format!("* {} is now {}", old, new_nick.trim())).await;
                return;
            }
            if text.is_empty() {
                return;
            }
            let line = format!("{}: {}", nickname(&conn), text);
            server.log(&line);
            broadcast(&server, conn.id(), &line).await;
        })
        .on_log(|line| println!("{}", line))
        .build()?;

    println!("Chat server listening on 127.0.0.1:8080");
    server.run().await?;

    Ok(())
}
