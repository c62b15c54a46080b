//! Framed TCP connection to the pool server

use super::codec::{Command, Framing, PoolCodec};
use crate::{Error, Result, ServerEndpoint};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::trace;

/// A plain TCP connection speaking the pool protocol
pub struct Connection {
    framed: Framed<TcpStream, PoolCodec>,
    peer: String,
    read_timeout: Option<Duration>,
}

impl Connection {
    /// Connect to the pool at `endpoint`
    pub async fn open(
        endpoint: &ServerEndpoint,
        framing: Framing,
        read_timeout: Option<Duration>,
    ) -> Result<Self> {
        if !endpoint.is_resolved() {
            return Err(Error::resolution("cannot connect to an unresolved endpoint"));
        }

        let stream = TcpStream::connect(endpoint.address()).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, framing, read_timeout))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, framing: Framing, read_timeout: Option<Duration>) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "pool".to_string());

        Self {
            framed: Framed::new(stream, PoolCodec::new(framing)),
            peer,
            read_timeout,
        }
    }

    /// Remote address, for logging
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write a command frame and flush it
    pub async fn send(&mut self, command: Command) -> Result<()> {
        trace!(peer = %self.peer, "-> {}", command);
        self.framed.send(command).await
    }

    /// Read one response of at most `max_len` bytes
    pub async fn recv(&mut self, max_len: usize) -> Result<String> {
        self.framed.codec_mut().set_max_len(max_len);

        let next = match self.read_timeout {
            Some(limit) => timeout(limit, self.framed.next())
                .await
                .map_err(|_| Error::timeout(format!("read from {}", self.peer)))?,
            None => self.framed.next().await,
        };

        match next {
            Some(Ok(response)) => {
                trace!(peer = %self.peer, "<- {}", response);
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => Err(Error::connection_closed(&self.peer)),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("framing", &self.framed.codec().framing())
            .finish()
    }
}
