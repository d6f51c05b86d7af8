//! Transport for the line protocol
//!
//! A [`DeviceLink`] is one open connection split into a buffered line reader
//! and a writer. A [`Connector`] knows how to open one.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::error::TransportError;

/// One open connection to the device
pub struct DeviceLink {
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl DeviceLink {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(BufReader::new(reader)),
            writer: Box::new(writer),
        }
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::new(read_half, write_half)
    }

    /// Write `line` plus terminator as a single burst and flush it
    pub async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');

        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read one reply line with its terminator stripped
    pub async fn read_line(&mut self) -> Result<String, TransportError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        trace!("device reply: {:?}", line);

        let trimmed_len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed_len);
        Ok(line)
    }
}

/// Opens links to the device
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable endpoint, used in logs and errors
    fn endpoint(&self) -> String;

    async fn connect(&self) -> io::Result<DeviceLink>;
}

/// Plain TCP connector
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> io::Result<DeviceLink> {
        let stream = timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

        // Commands are tiny; don't let Nagle hold them back
        stream.set_nodelay(true)?;

        Ok(DeviceLink::from_tcp(stream))
    }
}
