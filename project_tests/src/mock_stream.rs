//! # Mock Event Stream Server
//!
//! A local WebSocket server standing in for the backend's `/ws/tags/`
//! endpoint. Every accepted connection gets an index (0, 1, ...); tests see
//! what each connection receives and can push frames or close it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

/// What the server observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected(usize),
    Received(usize, String),
    Closed(usize),
}

enum Command {
    Send(String),
    Close,
}

pub struct MockStreamServer {
    addr: SocketAddr,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Command>>>>,
    accept_task: JoinHandle<()>,
}

impl MockStreamServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock stream server");
        let addr = listener.local_addr().expect("local addr");
        let (events_tx, events) = mpsc::unbounded_channel();
        let clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Command>>>> = Arc::default();

        let registry = clients.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        log::warn!("mock stream handshake failed: {e}");
                        continue;
                    }
                };
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                let index = {
                    let mut clients = registry.lock().unwrap();
                    clients.push(cmd_tx);
                    clients.len() - 1
                };
                log::debug!("mock stream accepted connection {index}");
                let _ = events_tx.send(ServerEvent::Connected(index));
                tokio::spawn(serve_client(ws, index, cmd_rx, events_tx.clone()));
            }
        });

        Self {
            addr,
            events,
            clients,
            accept_task,
        }
    }

    /// `http://127.0.0.1:<port>`, usable as a mirror origin.
    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self) -> url::Url {
        url::Url::parse(&format!("ws://{}/ws/tags/", self.addr)).expect("valid url")
    }

    pub fn connections(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn send(&self, connection: usize, text: impl Into<String>) {
        let clients = self.clients.lock().unwrap();
        let _ = clients[connection].send(Command::Send(text.into()));
    }

    /// Closes one connection from the server side.
    pub fn close(&self, connection: usize) {
        let clients = self.clients.lock().unwrap();
        let _ = clients[connection].send(Command::Close);
    }

    /// Next observed event; panics after 5 s.
    pub async fn next_event(&mut self) -> ServerEvent {
        self.next_event_within(Duration::from_secs(5))
            .await
            .expect("mock stream server event in time")
    }

    /// Next observed event, or `None` if nothing happens within `wait`.
    pub async fn next_event_within(&mut self, wait: Duration) -> Option<ServerEvent> {
        tokio::time::timeout(wait, self.events.recv()).await.ok().flatten()
    }

    /// Collects the next `count` text frames received on `connection`,
    /// skipping events of other kinds.
    pub async fn frames(&mut self, connection: usize, count: usize) -> Vec<String> {
        let mut frames = Vec::with_capacity(count);
        while frames.len() < count {
            if let ServerEvent::Received(index, text) = self.next_event().await {
                if index == connection {
                    frames.push(text);
                }
            }
        }
        frames
    }
}

impl Drop for MockStreamServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_client(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    index: usize,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ServerEvent::Received(index, text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
    let _ = events.send(ServerEvent::Closed(index));
}
