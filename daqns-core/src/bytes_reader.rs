use crate::packet::DeserializeError;
use bytes::{Buf, Bytes};
use DeserializeError as Error;
use DeserializeError::*;

type Result<T> = std::result::Result<T, Error>;

/// Consuming reader over a frame payload.
pub struct BytesReader {
	bytes: Bytes,
}

impl BytesReader {
	pub fn new(bytes: Bytes) -> Self {
		Self { bytes }
	}

	pub fn require(&self, len: usize) -> Result<()> {
		if self.bytes.remaining() >= len {
			Ok(())
		} else {
			Err(Incomplete)
		}
	}

	pub fn remaining(&self) -> usize {
		self.bytes.remaining()
	}

	pub fn has_remaining(&self) -> bool {
		self.bytes.has_remaining()
	}

	/// Consumes the reader, returning all unread bytes.
	pub fn take_inner(self) -> Bytes {
		self.bytes
	}

	pub fn take_u8(&mut self) -> Result<u8> {
		self.require(1)?;
		Ok(self.bytes.get_u8())
	}

	pub fn take_u16(&mut self) -> Result<u16> {
		self.require(2)?;
		Ok(self.bytes.get_u16())
	}

	pub fn take_bool(&mut self) -> Result<bool> {
		match self.take_u8()? {
			0 => Ok(false),
			1 => Ok(true),
			_ => Err(MalformedPacket("boolean field must be 0 or 1")),
		}
	}

	pub fn take_bytes(&mut self, len: usize) -> Result<Bytes> {
		self.require(len)?;
		Ok(self.bytes.split_to(len))
	}

	pub fn take_str(&mut self) -> Result<String> {
		let len = self.take_u16()?;
		let bytes = self.take_bytes(len.into())?;
		let s = String::from_utf8(bytes.into()).map_err(Error::FromUtf8Error)?;
		Ok(s)
	}
}
