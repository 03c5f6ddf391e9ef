//! # WebSocket Transport
//!
//! Each `open` spawns one task that owns the `tokio-tungstenite` stream. The
//! task is split into read and write halves and `select!`s between outbound
//! commands from the engine and inbound socket messages.

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, trace, warn};
use url::Url;

use super::{Transport, TransportSink};
use crate::error::{GaugeFeedError, Result};

enum WsCommand {
    Send(Vec<u8>),
    Close,
}

/// tokio-tungstenite backed [`Transport`].
#[derive(Debug, Default)]
pub struct WsTransport {
    commands: Option<mpsc::UnboundedSender<WsCommand>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &Url, sink: TransportSink) -> Result<()> {
        self.close();

        let (tx, rx) = mpsc::unbounded_channel();
        self.commands = Some(tx);
        tokio::spawn(run_socket(url.clone(), sink, rx));
        Ok(())
    }

    fn send(&mut self, bytes: Vec<u8>) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| GaugeFeedError::Transport("socket is not open".into()))?;
        commands
            .send(WsCommand::Send(bytes))
            .map_err(|_| GaugeFeedError::Transport("socket task has stopped".into()))
    }

    fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(WsCommand::Close);
        }
    }
}

impl std::fmt::Debug for WsCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WsCommand::Send(bytes) => write!(f, "Send({} bytes)", bytes.len()),
            WsCommand::Close => f.write_str("Close"),
        }
    }
}

async fn run_socket(url: Url, sink: TransportSink, mut commands: mpsc::UnboundedReceiver<WsCommand>) {
    let session = sink.session();
    debug!(session, %url, "Opening WebSocket");

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            sink.failed(format!("connect to {} failed: {}", url, e));
            return;
        }
    };

    if !sink.opened() {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(WsCommand::Send(bytes)) => {
                    if let Err(e) = write.send(WsMessage::Binary(bytes.into())).await {
                        sink.failed(format!("write failed: {}", e));
                        break;
                    }
                }
                Some(WsCommand::Close) | None => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    debug!(session, "WebSocket closed by client");
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(WsMessage::Binary(data))) => {
                    if !sink.message(data.to_vec()) {
                        break;
                    }
                }
                Some(Ok(WsMessage::Text(text))) => {
                    warn!(session, len = text.len(), "Ignoring text message on binary protocol");
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason.as_str()))
                        .unwrap_or_else(|| "closed by server".to_string());
                    sink.closed(reason);
                    break;
                }
                Some(Ok(other)) => {
                    trace!(session, ?other, "Control frame");
                }
                Some(Err(e)) => {
                    sink.failed(format!("read failed: {}", e));
                    break;
                }
                None => {
                    sink.closed("stream ended");
                    break;
                }
            },
        }
    }
}
