use bytes::{Buf, BytesMut};
use daqns_core::{DeserializeError, Packet, SerializeError};
use std::io::{self, Cursor};
use thiserror::Error;
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt, BufWriter},
	net::TcpStream,
};

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("connection reset by peer")]
	ConnectionReset,
	#[error("peer heartbeat timed out")]
	HeartbeatTimeout,
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error("protocol error: {0}")]
	Protocol(#[from] DeserializeError),
	#[error("frame serialization failed")]
	Serialize(#[from] SerializeError),
}

/// Framed bidirectional channel over one TCP socket.
#[derive(Debug)]
pub(crate) struct Connection {
	stream: BufWriter<TcpStream>,
	buffer: BytesMut,
}

impl Connection {
	pub fn new(socket: TcpStream) -> Self {
		Self {
			stream: BufWriter::new(socket),
			buffer: BytesMut::with_capacity(8 * 1024),
		}
	}

	/// Reads a single [`Packet`] from the underlying stream.
	///
	/// Frames carrying unknown optional tags are skipped. Returns `None` when
	/// the peer shut the connection down cleanly.
	pub async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
		loop {
			// Drain complete frames already buffered; skipped frames parse to
			// an inner `None` and are simply consumed.
			while let Some(parsed) = self.parse_frame()? {
				if let Some(packet) = parsed {
					tracing::trace!(?packet, "incoming");
					return Ok(Some(packet));
				}
			}

			// Not enough buffered data for a frame. Attempt to read more.
			if 0 == self.stream.read_buf(&mut self.buffer).await? {
				// If the buffer is empty the connection was shut down
				// cleanly, otherwise the peer died mid-frame.
				if self.buffer.is_empty() {
					return Ok(None);
				} else {
					return Err(TransportError::ConnectionReset);
				}
			}
		}
	}

	fn parse_frame(&mut self) -> Result<Option<Option<Packet>>, TransportError> {
		let mut buf = Cursor::new(&self.buffer[..]);
		match Packet::check(&mut buf) {
			Ok(()) => {
				let len = buf.position() as usize;
				buf.set_position(0);

				let packet = Packet::parse(&mut buf)?;
				self.buffer.advance(len);
				Ok(Some(packet))
			}
			Err(DeserializeError::Incomplete) => Ok(None),
			Err(error) => Err(error.into()),
		}
	}

	pub async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
		let mut buf = BytesMut::new();
		packet.serialize_into(&mut buf)?;

		self.stream.write_all(&buf).await?;
		self.stream.flush().await?;
		Ok(())
	}
}
