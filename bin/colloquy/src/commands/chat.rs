use colloquy_core::{ClientFrame, ServerFrame, TurnStatus};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

/// Interactive WebSocket client against a running gateway.
pub async fn run(url: &str) -> anyhow::Result<()> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();

    // All outbound frames funnel through one writer task.
    let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(16);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if write.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    out_tx.send(ClientFrame::Hello).await?;

    let pong_tx = out_tx.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    eprintln!("connection error: {}", e);
                    break;
                }
            };
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Welcome { session_id }) => {
                        println!("connected (session {})", session_id);
                    }
                    Ok(ServerFrame::Reply {
                        reply,
                        turn_status,
                        degraded_capabilities,
                    }) => {
                        println!("{}", reply);
                        match turn_status {
                            TurnStatus::Partial => {
                                println!("  [partial — unavailable: {}]", degraded_capabilities.join(", "));
                            }
                            TurnStatus::Errored => println!("  [errored]"),
                            TurnStatus::Answered => {}
                        }
                    }
                    Ok(ServerFrame::Event { event, detail }) => {
                        println!("* {}: {}", event, detail);
                    }
                    Ok(ServerFrame::Ping) => {
                        let _ = pong_tx.send(ClientFrame::Pong).await;
                    }
                    Err(_) => println!("{}", text),
                },
                WsMessage::Close(_) => {
                    println!("server closed the connection");
                    break;
                }
                _ => {}
            }
        }
    });

    println!("Type a message and press enter; /quit to exit.");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        out_tx
            .send(ClientFrame::Chat {
                text: line.to_string(),
            })
            .await?;
    }

    reader.abort();
    writer.abort();
    Ok(())
}
