//! In-process WebSocket peer for transport tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

/// Installs a test log subscriber once. Honors `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

enum ServerCommand {
    Text(String),
    Binary(Vec<u8>),
    CloseConnection,
    Shutdown,
}

/// A WebSocket server on `127.0.0.1:0`, running on its own thread.
///
/// Accepts connections one after another. Everything received is recorded;
/// in echo mode it is also sent back.
pub(crate) struct TestServer {
    port: u16,
    received: Arc<Mutex<Vec<u8>>>,
    connections: Arc<AtomicUsize>,
    commands: mpsc::UnboundedSender<ServerCommand>,
}

impl TestServer {
    /// Server that echoes every message back.
    pub(crate) fn echo() -> Self {
        Self::start(true)
    }

    /// Server that only records what it receives.
    pub(crate) fn recording() -> Self {
        Self::start(false)
    }

    fn start(echo: bool) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (port_tx, port_rx) = std_mpsc::channel();

        {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            thread::spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("test runtime");
                runtime.block_on(serve(echo, port_tx, command_rx, received, connections));
            });
        }

        let port = port_rx.recv().expect("test server port");
        Self {
            port,
            received,
            connections,
            commands,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn send_text(&self, text: &str) {
        let _ = self.commands.send(ServerCommand::Text(text.to_owned()));
    }

    pub(crate) fn send_binary(&self, data: &[u8]) {
        let _ = self.commands.send(ServerCommand::Binary(data.to_vec()));
    }

    /// Sends a close frame and drops the current connection.
    pub(crate) fn close_connection(&self) {
        let _ = self.commands.send(ServerCommand::CloseConnection);
    }

    pub(crate) fn received(&self) -> Vec<u8> {
        self.received.lock().clone()
    }

    /// Waits up to five seconds for at least `len` received bytes.
    pub(crate) fn wait_received(&self, len: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.received.lock().len() < len && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        self.received()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.commands.send(ServerCommand::Shutdown);
    }
}

async fn serve(
    echo: bool,
    port_tx: std_mpsc::Sender<u16>,
    mut commands: mpsc::UnboundedReceiver<ServerCommand>,
    received: Arc<Mutex<Vec<u8>>>,
    connections: Arc<AtomicUsize>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let _ = port_tx.send(port);

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(_) => return,
            },
            command = commands.recv() => match command {
                Some(ServerCommand::Shutdown) | None => return,
                Some(_) => continue,
            },
        };

        let Ok(ws_stream) = accept_async(stream).await else {
            continue;
        };
        connections.fetch_add(1, Ordering::SeqCst);
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => match message {
                    Some(Ok(Message::Binary(data))) => {
                        received.lock().extend_from_slice(&data);
                        if echo {
                            let _ = ws_write.send(Message::Binary(data)).await;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        received.lock().extend_from_slice(text.as_str().as_bytes());
                        if echo {
                            let _ = ws_write.send(Message::Text(text)).await;
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                command = commands.recv() => match command {
                    Some(ServerCommand::Text(text)) => {
                        let _ = ws_write.send(Message::Text(text.into())).await;
                    }
                    Some(ServerCommand::Binary(data)) => {
                        let _ = ws_write.send(Message::Binary(data.into())).await;
                    }
                    Some(ServerCommand::CloseConnection) => {
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                    Some(ServerCommand::Shutdown) | None => return,
                },
            }
        }
    }
}
