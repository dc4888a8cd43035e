//! Transport used to open the engine command socket.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;

use crate::config::Endpoint;

/// Write half of an open command channel.
pub type EngineStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens command channels to the engine.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<EngineStream>;
}

/// Plain TCP connector with a bounded connect time.
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<EngineStream> {
        let stream = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {endpoint} timed out after {:?}", self.timeout),
            )
        })??;

        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
