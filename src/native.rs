//! Native messaging port
//!
//! Browsers talk to a native host over its stdin/stdout. Each message is a
//! `u32` length in native byte order followed by that many bytes of UTF-8
//! JSON.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stdin, Stdout};
use tracing::{debug, warn};

use crate::relay::Response;
use crate::transport::{Port, TransportError};

/// Largest message the browser accepts from a host.
pub const MAX_OUTGOING_MESSAGE: usize = 1024 * 1024;

/// Largest message the browser sends to a host.
pub const MAX_INCOMING_MESSAGE: usize = 64 * 1024 * 1024;

pub struct NativePort<R, W> {
    reader: R,
    writer: W,
}

/// Port over the process's own stdin and stdout.
pub fn stdio() -> NativePort<Stdin, Stdout> {
    NativePort::new(tokio::io::stdin(), tokio::io::stdout())
}

impl<R, W> NativePort<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Read one framed message. A clean end of input before a new frame
    /// yields `None`.
    ///
    /// A frame that is too large or not JSON is consumed whole before the
    /// error is returned, so the next read starts on a frame boundary.
    pub async fn read_message(&mut self) -> Result<Option<Value>, TransportError> {
        let mut header = [0u8; 4];
        match self.reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_ne_bytes(header) as usize;
        if length > MAX_INCOMING_MESSAGE {
            let skipped = tokio::io::copy(
                &mut (&mut self.reader).take(length as u64),
                &mut tokio::io::sink(),
            )
            .await?;
            if skipped < length as u64 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            return Err(TransportError::MessageTooLarge(length));
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await?;
        debug!("Read {} byte message", length);

        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Write one framed message.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let body = serde_json::to_vec(message)?;
        if body.len() > MAX_OUTGOING_MESSAGE {
            return Err(TransportError::MessageTooLarge(body.len()));
        }

        self.writer
            .write_all(&(body.len() as u32).to_ne_bytes())
            .await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl<R, W> Port for NativePort<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn recv(&mut self) -> Result<Option<Value>, TransportError> {
        self.read_message().await
    }

    async fn post(&mut self, response: &Response) -> Result<(), TransportError> {
        match self.write_message(response).await {
            Err(TransportError::MessageTooLarge(size)) => {
                warn!("Dropping {} byte response, over the browser limit", size);
                let error = Response::error(format!(
                    "Response too large for the browser ({} bytes)",
                    size
                ));
                self.write_message(&error).await
            }
            other => other,
        }
    }
}
