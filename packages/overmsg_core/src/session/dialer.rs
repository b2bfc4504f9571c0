//! Opening the persistent channel.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::token::Token;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Both halves of one persistent connection.
pub struct Link {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl Link {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Opens a raw persistent connection. The handshake is the session's job.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> std::io::Result<Link>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> std::io::Result<Link> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Link::new(reader, writer))
    }
}

/// Send the token as the first line of the connection.
pub(crate) async fn write_handshake(
    writer: &mut BoxedWriter,
    token: &Token,
) -> std::io::Result<()> {
    writer.write_all(token.expose().as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
