// Live feed over WebSocket.
//
// Each client sends `subscribe`/`unsubscribe` messages naming document path
// prefixes and receives:
// - `change` for every store mutation under one of its prefixes,
// - every message on the live broadcast (insight tokens, reminders),
// - `error` when it sends something that does not parse.

use std::sync::Arc;

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use pondledger_core::paths::DocPath;
use pondledger_core::protocol::{ClientMessage, LiveMessage, StoreChange};
use pondledger_core::store::DocumentStore;

/// Path prefixes one client listens on.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Subscriptions(Vec<DocPath>);

impl Subscriptions {
    pub fn apply(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Subscribe { path } => {
                if !self.0.contains(&path) {
                    self.0.push(path);
                }
            }
            ClientMessage::Unsubscribe { path } => self.0.retain(|p| *p != path),
        }
    }

    pub fn wants(&self, change: &StoreChange) -> bool {
        self.0.iter().any(|prefix| change.affects(prefix))
    }

    pub fn paths(&self) -> &[DocPath] {
        &self.0
    }
}

/// Apply one text frame from a client. Returns the error reply for frames
/// that are not a valid client message.
pub fn handle_client_text(subs: &mut Subscriptions, text: &str) -> Option<LiveMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => {
            debug!(?msg, "client message");
            subs.apply(msg);
            None
        }
        Err(e) => Some(LiveMessage::Error {
            message: format!("invalid message: {e}"),
        }),
    }
}

/// Run the live feed on `bind:port` until the task is cancelled.
pub async fn run(
    bind: &str,
    port: u16,
    store: Arc<DocumentStore>,
    live: broadcast::Sender<LiveMessage>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("{bind}:{port}")).await?;
    serve(listener, store, live).await
}

/// Accept connections on `listener`, one task per client.
pub async fn serve(
    listener: TcpListener,
    store: Arc<DocumentStore>,
    live: broadcast::Sender<LiveMessage>,
) -> anyhow::Result<()> {
    info!("live feed listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        let addr = addr.to_string();
        info!("live client connecting from {addr}");
        tokio::spawn(handle_connection(
            stream,
            addr,
            Arc::clone(&store),
            live.clone(),
        ));
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: String,
    store: Arc<DocumentStore>,
    live: broadcast::Sender<LiveMessage>,
) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    let changes = store.subscribe_all();
    let messages = live.subscribe();

    let (mut write, read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<LiveMessage>(64);

    let writer_addr = addr.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to serialize live message: {e}");
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(json.into())).await {
                warn!("send to {writer_addr} failed: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    let _ = serve_client(read, &out_tx, changes, messages, &addr).await;
    drop(out_tx);
    let _ = writer.await;
    info!("Client {addr} disconnected");
}

/// Drive one client: read its frames from `read` and queue everything it
/// should receive on `out`. Returns `Err(())` once `out` is closed, which
/// means the socket writer has gone away.
///
/// Generic over the frame stream so it can be driven without a socket.
pub async fn serve_client<St>(
    mut read: St,
    out: &mpsc::Sender<LiveMessage>,
    mut changes: broadcast::Receiver<StoreChange>,
    mut live: broadcast::Receiver<LiveMessage>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut subs = Subscriptions::default();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_client_text(&mut subs, text.as_str()) {
                        out.send(reply).await.map_err(|_| ())?;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Client {addr} sent close frame");
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error from {addr}: {e}");
                    break;
                }
                None => break,
                // Binary, ping, pong and raw frames carry nothing for us.
                Some(Ok(_)) => {}
            },
            change = changes.recv() => match change {
                Ok(change) if subs.wants(&change) => {
                    out.send(LiveMessage::Change(change)).await.map_err(|_| ())?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(addr, skipped, "live client lagged, store changes dropped");
                }
                Err(RecvError::Closed) => break,
            },
            msg = live.recv() => match msg {
                Ok(msg) => out.send(msg).await.map_err(|_| ())?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(addr, skipped, "live client lagged, messages dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
