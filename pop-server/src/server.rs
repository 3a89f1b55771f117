//! TCP front end: one JSON-RPC request per line, one answer per request.
//!
//! Each connection gets an outbound queue drained by a writer task; both
//! answers and channel broadcasts go through it, so a client sees them in
//! the order the hub produced them.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{self, ServerConfig};
use crate::crypto::{self, ServerKeys};
use crate::error::HubError;
use crate::hub::Hub;
use crate::rpc::Answer;
use crate::schema::StructuralValidator;
use crate::sockets::Socket;

/// Outbound queue depth per connection.
const SEND_QUEUE_LEN: usize = 4096;

pub struct Server {
    config: ServerConfig,
    server_keys: Option<ServerKeys>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            server_keys: None,
        }
    }

    /// Use the given key instead of the configured key file.
    pub fn with_server_keys(config: ServerConfig, keys: ServerKeys) -> Self {
        Self {
            config,
            server_keys: Some(keys),
        }
    }

    fn build_hub(self) -> Result<(Arc<Hub>, usize)> {
        let keys = match self.server_keys {
            Some(keys) => keys,
            None => config::load_or_create_server_key(self.config.server_key_file.as_deref())?,
        };
        let hub = Hub::new(Arc::new(keys), Arc::new(StructuralValidator));

        if let Some(ref path) = self.config.lao_file {
            let file = config::load_lao_file(path)?;
            tracing::info!("Loaded {} LAOs from {}", file.lao.len(), path.display());
            for lao in file.lao {
                let organizer = crypto::parse_public_key(&lao.organizer)?;
                hub.register_lao(&lao.id, organizer, lao.attendees);
            }
        }

        Ok((Arc::new(hub), self.config.max_line_len))
    }

    /// Run the server, blocking forever.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        tracing::info!("Listening on {}", self.config.listen_addr);
        let (hub, max_line_len) = self.build_hub()?;
        tracing::info!(public_key = %hub.server_keys().public_key_b64(), "Hub ready");
        accept_loop(listener, hub, max_line_len).await
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let (addr, _hub, handle) = self.start_with_hub().await?;
        Ok((addr, handle))
    }

    /// Like [`Server::start`], also handing out the hub for inspection.
    pub async fn start_with_hub(self) -> Result<(SocketAddr, Arc<Hub>, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let (hub, max_line_len) = self.build_hub()?;
        let handle = tokio::spawn(accept_loop(listener, Arc::clone(&hub), max_line_len));
        Ok((addr, hub, handle))
    }
}

async fn accept_loop(listener: TcpListener, hub: Arc<Hub>, max_line_len: usize) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            if let Err(e) = handle(stream, hub, max_line_len).await {
                tracing::error!("Connection error: {e}");
            }
        });
    }
}

/// Handle a plain TCP connection.
pub async fn handle(stream: TcpStream, hub: Arc<Hub>, max_line_len: usize) -> Result<()> {
    let peer = stream.peer_addr()?;
    let socket_id = format!("{peer}");
    tracing::info!(%socket_id, "New connection");
    let (reader, writer) = tokio::io::split(stream);
    handle_io(BufReader::new(reader), writer, socket_id, hub, max_line_len).await
}

async fn handle_io<R, W>(
    mut reader: BufReader<R>,
    writer: W,
    socket_id: String,
    hub: Arc<Hub>,
    max_line_len: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(SEND_QUEUE_LEN);
    let socket = Socket::new(socket_id.clone(), tx);

    let write_socket_id = socket_id.clone();
    let mut write_half = writer;
    let write_handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = write_line(&mut write_half, &line).await {
                tracing::warn!(socket_id = %write_socket_id, "Write error: {e}");
                break;
            }
            // Drain what is already queued before flushing.
            let mut batch_count = 0;
            while let Ok(queued) = rx.try_recv() {
                if let Err(e) = write_line(&mut write_half, &queued).await {
                    tracing::warn!(socket_id = %write_socket_id, "Write error: {e}");
                    return;
                }
                batch_count += 1;
                if batch_count >= 64 {
                    break;
                }
            }
            if let Err(e) = write_half.flush().await {
                tracing::warn!(socket_id = %write_socket_id, "Flush error: {e}");
                break;
            }
        }
    });

    let mut line_buf = String::new();
    loop {
        line_buf.clear();
        match reader.read_line(&mut line_buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%socket_id, "Read error: {e}");
                break;
            }
        }

        if line_buf.len() > max_line_len {
            tracing::warn!(%socket_id, len = line_buf.len(), "Line too long, dropping");
            let err = HubError::DecodeError(format!("request exceeds {max_line_len} bytes"));
            reply(&socket, &Answer::error(None, &err));
            continue;
        }

        let line = line_buf.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(answer) = hub.handle_line(line, &socket) {
            reply(&socket, &answer);
        }
    }

    tracing::info!(%socket_id, "Connection closed");
    hub.remove_socket(&socket_id);
    // Last sender gone: the writer drains the queue and exits.
    drop(socket);
    if let Err(e) = write_handle.await {
        tracing::warn!(%socket_id, "Writer task failed: {e}");
    }
    Ok(())
}

fn reply(socket: &Socket, answer: &Answer) {
    match serde_json::to_string(answer) {
        Ok(line) => {
            socket.send(line);
        }
        Err(e) => tracing::error!(socket_id = %socket.id(), "Failed to marshal answer: {e}"),
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}
