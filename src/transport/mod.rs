//! Line-oriented transports.
//!
//! A [`Transport`] moves whole ASCII lines to and from one instrument. The
//! protocol on top of it is half-duplex with a single outstanding command, so
//! the trait only needs three things: write a line, read a line within a bound,
//! and say which port it is attached to.
//!
//! [`LineTransport`] implements the trait for any tokio byte stream. Production
//! code wraps a `tokio_serial::SerialStream` (see [`open_serial`]); tests wrap
//! one half of a `tokio::io::duplex` pipe.

mod claim;
mod serial;

pub use claim::PortClaim;
#[cfg(feature = "instrument_serial")]
pub use serial::open_serial;
pub use serial::{ConnectionParams, Parity};

use crate::error::LabError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Raw line I/O against one instrument.
#[async_trait]
pub trait Transport: Send {
    /// Writes one fully framed command line (terminator included). Input
    /// left over from earlier exchanges is discarded first.
    async fn write_line(&mut self, line: &[u8]) -> Result<(), LabError>;

    /// Reads one response line, without its `\n` / `\r\n` ending.
    ///
    /// Fails with [`LabError::TransportTimeout`] when no complete line arrives
    /// within `timeout`, and with [`LabError::Protocol`] when the stream ends
    /// first.
    async fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, LabError>;

    /// Port identifier, used in errors and log events.
    fn port(&self) -> &str;
}

/// [`Transport`] over any async byte stream.
pub struct LineTransport<S> {
    port: String,
    stream: BufReader<S>,
    _claim: Option<PortClaim>,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a stream without claiming the port name.
    pub fn new(port: impl Into<String>, stream: S) -> Self {
        Self {
            port: port.into(),
            stream: BufReader::new(stream),
            _claim: None,
        }
    }

    /// Wraps a stream and claims its port name for the lifetime of the
    /// transport. Fails if another live transport already holds the claim.
    pub fn claimed(port: impl Into<String>, stream: S) -> Result<Self, LabError> {
        let port = port.into();
        let claim = PortClaim::acquire(&port)?;
        Ok(Self {
            port,
            stream: BufReader::new(stream),
            _claim: Some(claim),
        })
    }

    /// Drops whatever the device has already sent, typically a late reply to
    /// a command that timed out. Returns the number of bytes discarded.
    async fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        loop {
            let available =
                match tokio::time::timeout(Duration::ZERO, self.stream.fill_buf()).await {
                    Ok(Ok(buf)) => buf.len(),
                    _ => 0,
                };
            if available == 0 {
                return discarded;
            }
            self.stream.consume(available);
            discarded += available;
        }
    }

    pub(crate) fn with_claim(port: String, stream: S, claim: PortClaim) -> Self {
        Self {
            port,
            stream: BufReader::new(stream),
            _claim: Some(claim),
        }
    }
}

#[async_trait]
impl<S> Transport for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_line(&mut self, line: &[u8]) -> Result<(), LabError> {
        let stale = self.discard_pending().await;
        if stale > 0 {
            warn!(port = %self.port, bytes = stale, "discarded unread input before write");
        }

        let io_err = |source| LabError::Io {
            port: self.port.clone(),
            source,
        };
        self.stream.write_all(line).await.map_err(io_err)?;
        self.stream.flush().await.map_err(io_err)?;
        debug!(port = %self.port, line = %String::from_utf8_lossy(line).trim_end(), "sent");
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, LabError> {
        let mut buf = Vec::with_capacity(32);
        let read = tokio::time::timeout(timeout, self.stream.read_until(b'\n', &mut buf)).await;

        match read {
            Err(_) => Err(LabError::TransportTimeout {
                port: self.port.clone(),
                timeout,
            }),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(LabError::TransportTimeout {
                    port: self.port.clone(),
                    timeout,
                })
            }
            Ok(Err(source)) => Err(LabError::Io {
                port: self.port.clone(),
                source,
            }),
            Ok(Ok(0)) => Err(LabError::Protocol(format!(
                "'{}' closed before a response line arrived",
                self.port
            ))),
            Ok(Ok(_)) if buf.last() != Some(&b'\n') => Err(LabError::Protocol(format!(
                "short read on '{}': {:?}",
                self.port,
                String::from_utf8_lossy(&buf)
            ))),
            Ok(Ok(_)) => {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                debug!(port = %self.port, line = %String::from_utf8_lossy(&buf), "received");
                Ok(buf)
            }
        }
    }

    fn port(&self) -> &str {
        &self.port
    }
}
