//! TCP server answering table and ring requests.

use crate::error::{NetworkError, Result};
use crate::network::handler::RequestHandler;
use crate::network::wire::{decode, ChordMsg};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before a
/// new frame started.
pub(crate) async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string()).into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(NetworkError::FrameTooLarge {
            size: len,
            max: max_size,
        }
        .into());
    }

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .await
        .map_err(|e| NetworkError::ReceiveFailed(format!("truncated frame: {}", e)))?;
    Ok(Some(Bytes::from(data)))
}

/// Write one length-prefixed frame.
pub(crate) async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&(data.len() as u32).to_be_bytes());
    framed.extend_from_slice(data);

    writer
        .write_all(&framed)
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    Ok(())
}

/// Run the handler bound to a decoded request, or answer with an error.
pub async fn dispatch(handler: &dyn RequestHandler, frame: &[u8]) -> ChordMsg {
    let msg = match decode(frame) {
        Ok(msg) => msg,
        Err(e) => return ChordMsg::error(e.to_string()),
    };

    match msg.handler {
        Some(bound) => bound(handler, &msg).await,
        None => ChordMsg::error(format!("no handler for message type {:?}", msg.msg_type)),
    }
}

/// TCP server for table requests.
pub struct NetworkServer {
    /// Bound listener.
    listener: TcpListener,

    /// Request handler.
    handler: Arc<dyn RequestHandler>,

    /// Largest accepted frame.
    max_message_size: usize,

    /// Shutdown signal receiver.
    shutdown_rx: mpsc::Receiver<()>,
}

impl NetworkServer {
    /// Bind a new server. Port 0 picks a free port; see [`Self::local_addr`].
    pub async fn bind(
        bind_addr: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        max_message_size: usize,
    ) -> Result<(Self, mpsc::Sender<()>)> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(NetworkError::Io)?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let server = Self {
            listener,
            handler,
            max_message_size,
            shutdown_rx,
        };

        Ok((server, shutdown_tx))
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr().map_err(NetworkError::Io)?)
    }

    /// Run the server until the shutdown channel fires or closes.
    pub async fn run(mut self) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "Network server listening");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Accepted connection");
                            let handler = self.handler.clone();
                            let max = self.max_message_size;
                            tokio::spawn(async move {
                                if let Err(e) =
                                    Self::handle_connection(stream, handler, max).await
                                {
                                    debug!(error = %e, "Connection handler error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Network server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_connection(
        mut stream: TcpStream,
        handler: Arc<dyn RequestHandler>,
        max_message_size: usize,
    ) -> Result<()> {
        while let Some(frame) = read_frame(&mut stream, max_message_size).await? {
            let response = dispatch(handler.as_ref(), &frame).await;
            write_frame(&mut stream, &response.to_bytes()).await?;
        }
        Ok(())
    }
}
