use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Sends a status query and one task to a tier node", long_about = None)]
struct Args {
    /// Node WebSocket URL
    #[clap(short, long, default_value = "ws://127.0.0.1:9001/ws")]
    url: String,

    /// Processing profile to request
    #[clap(short, long, default_value = "logos9.5")]
    profile: String,

    /// Text to process
    #[clap(default_value = "Hello, public tier!")]
    prompt: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("Connecting to {}...", args.url);
    let (mut ws, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;

    let status = send(&mut ws, json!({ "action": "status", "tier": "PUBLIC" })).await?;
    println!("Node Status: {}", serde_json::to_string_pretty(&status)?);

    let result = send(
        &mut ws,
        json!({ "action": "process", "model": args.profile, "prompt": args.prompt, "tier": "PUBLIC" }),
    )
    .await?;
    println!("Processing Result: {}", serde_json::to_string_pretty(&result)?);

    ws.close(None).await.ok();
    Ok(())
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn send(ws: &mut WsStream, command: Value) -> Result<Value> {
    ws.send(Message::Text(command.to_string().into())).await?;
    while let Some(msg) = ws.next().await {
        if let Message::Text(text) = msg? {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
    anyhow::bail!("Connection closed before a reply arrived")
}
