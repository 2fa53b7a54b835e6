//! Length-prefixed JSON framing over a byte pipe.
//!
//! Each frame is a 4-byte little-endian length followed by that many bytes of
//! UTF-8 JSON, matching the driver's stdio protocol.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{Transport, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Pipe transport before it is split into halves.
pub struct PipeTransport<W, R> {
	stdin: W,
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
	max_frame_size: Option<usize>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `stdin` and reading from `stdout`.
	///
	/// Inbound envelopes are delivered on the returned receiver.
	pub fn new(stdin: W, stdout: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				stdin,
				stdout,
				message_tx,
				max_frame_size: None,
			},
			message_rx,
		)
	}

	/// Rejects inbound frames larger than `bytes`.
	pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
		self.max_frame_size = Some(bytes);
		self
	}

	/// Writes one framed envelope.
	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.stdin, &message).await
	}

	/// Reads frames until the pipe closes or the receiver is dropped.
	pub async fn run(&mut self) -> Result<()> {
		read_frames(&mut self.stdout, &self.message_tx, self.max_frame_size).await
	}

	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(
			PipeTransportSender { stdin: self.stdin },
			PipeTransportReceiver {
				stdout: self.stdout,
				message_tx: self.message_tx,
				max_frame_size: self.max_frame_size,
			},
		)
	}

	/// Splits into the boxed halves a connection consumes.
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}
}

/// Writing half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	stdin: W,
}

impl<W> Transport for PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send,
{
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		async move { write_frame(&mut self.stdin, &message).await }.boxed()
	}
}

/// Reading half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
	max_frame_size: Option<usize>,
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	fn run(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		async move { read_frames(&mut self.stdout, &self.message_tx, self.max_frame_size).await }.boxed()
	}
}

async fn write_frame<W: AsyncWrite + Unpin>(stdin: &mut W, message: &Value) -> Result<()> {
	let bytes = serde_json::to_vec(message)?;
	let length = u32::try_from(bytes.len())
		.map_err(|_| Error::TransportError(format!("message of {} bytes exceeds frame limit", bytes.len())))?;

	stdin.write_all(&length.to_le_bytes()).await?;
	stdin.write_all(&bytes).await?;
	stdin.flush().await?;
	Ok(())
}

async fn read_frames<R: AsyncRead + Unpin>(
	stdout: &mut R,
	message_tx: &mpsc::UnboundedSender<Value>,
	max_frame_size: Option<usize>,
) -> Result<()> {
	loop {
		let mut len_buf = [0u8; 4];
		stdout
			.read_exact(&mut len_buf)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;
		let length = u32::from_le_bytes(len_buf) as usize;

		if let Some(max) = max_frame_size {
			if length > max {
				return Err(Error::TransportError(format!(
					"frame of {length} bytes exceeds limit of {max}"
				)));
			}
		}

		let mut body = vec![0u8; length];
		stdout
			.read_exact(&mut body)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read message body: {e}")))?;

		let message = match serde_json::from_slice::<Value>(&body) {
			Ok(message) => message,
			Err(e) => {
				tracing::error!(length, error = %e, "dropping frame with invalid JSON");
				continue;
			}
		};

		if message_tx.send(message).is_err() {
			tracing::debug!("message receiver dropped, stopping reader");
			return Ok(());
		}
	}
}
