//! # TCP Connection Abstraction
//!
//! Wraps a TCP stream with line framing for the peer protocol.
//!
//! ## Wire Protocol
//!
//! Every message is a single JSON object terminated by `\n`:
//! ```text
//! {"method": "register_peer", "params": [4, ["10.0.0.5", 40123]]}\n
//! ```
//!
//! Framing is done by `tokio_util`'s `LinesCodec`, capped at
//! [`MAX_MESSAGE_SIZE`] so a peer that never sends a newline cannot make us
//! buffer without bound.

use futures::{SinkExt, StreamExt};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use super::error::{Error, Result};
use super::messages::Address;

/// Maximum allowed line length (16MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Line-framed TCP connection carrying JSON messages.
pub struct Connection {
    lines: Framed<TcpStream, LinesCodec>,
}

impl Connection {
    /// Wrap an established TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            lines: Framed::new(stream, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE)),
        }
    }

    /// Open a new connection to `address`.
    ///
    /// # Example
    /// ```ignore
    /// let mut conn = Connection::connect(&Address::new("127.0.0.1", 40001)).await?;
    /// ```
    pub async fn connect(address: &Address) -> Result<Self> {
        let stream = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(|e| Error::communication(format!("cannot reach {address}: {e}")))?;
        Ok(Self::new(stream))
    }

    /// Read one message.
    ///
    /// # Returns
    /// - `Ok(Some(T))`: a full line arrived and decoded into `T`
    /// - `Ok(None)`: the other side closed the connection before sending a line
    /// - `Err`: I/O error, oversized line, or a line that is not a valid `T`
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.lines.next().await {
            Some(Ok(line)) => {
                debug!("⬅️  {}", line);
                Ok(Some(serde_json::from_str(&line)?))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Write one message and flush it.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let line = serde_json::to_string(message)?;
        debug!("➡️  {}", line);
        self.lines.send(line).await?;
        Ok(())
    }
}
