//! Byte sources for a ground station session.
//!
//! The radio modems reach the ground station as a plain byte stream: a serial
//! device, a TCP bridge, a recorded capture file or a pipe on stdin. Any
//! `AsyncRead` can be handed to
//! [`GroundStation::connect_reader`](crate::station::GroundStation::connect_reader);
//! [`Source`] covers the common cases.

use std::fmt;
use std::path::PathBuf;

use tokio::io::AsyncRead;
use tracing::info;

use crate::error::{Error, Result};

/// A boxed byte stream.
pub type ByteStream = Box<dyn AsyncRead + Unpin + Send>;

/// Where telemetry bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Standard input.
    Stdin,
    /// A recorded capture or a device node.
    File(PathBuf),
    /// A TCP endpoint, `host:port`.
    Tcp(String),
}

impl Source {
    /// Open the source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportOpen`] if the file cannot be opened or the
    /// TCP connection fails.
    pub async fn open(&self) -> Result<ByteStream> {
        let stream: ByteStream = match self {
            Self::Stdin => Box::new(tokio::io::stdin()),
            Self::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| Error::transport_open(self.to_string(), e.to_string()))?;
                Box::new(file)
            }
            Self::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|e| Error::transport_open(self.to_string(), e.to_string()))?;
                stream.set_nodelay(true)?;
                Box::new(stream)
            }
        };

        info!(source = %self, "Opened telemetry source");
        Ok(stream)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp {addr}"),
        }
    }
}
