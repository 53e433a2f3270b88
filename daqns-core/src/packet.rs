use crate::bytes_reader::BytesReader;
use bytes::{Buf, BufMut, Bytes};
use std::{error, fmt, io, mem, string::FromUtf8Error};

/// Payload-type tags. Tags with the high bit clear are required: a peer that
/// does not understand one must drop the session. Tags with the high bit set
/// are optional and skipped when unknown.
mod tag {
	pub const SIGNAL_AVAILABLE: u8 = 0x01;
	pub const SIGNAL_UNAVAILABLE: u8 = 0x02;
	pub const SUBSCRIBE: u8 = 0x03;
	pub const UNSUBSCRIBE: u8 = 0x04;
	pub const SUBSCRIBE_ACK: u8 = 0x05;
	pub const UNSUBSCRIBE_ACK: u8 = 0x06;
	pub const HEARTBEAT: u8 = 0x07;
	pub const STATE_RESTORE: u8 = 0x08;
	pub const SIGNAL_PACKET: u8 = 0x10;
	pub const CONFIG_BLOB: u8 = 0x20;

	pub fn is_known(tag: u8) -> bool {
		matches!(
			tag,
			SIGNAL_AVAILABLE
				| SIGNAL_UNAVAILABLE
				| SUBSCRIBE | UNSUBSCRIBE
				| SUBSCRIBE_ACK | UNSUBSCRIBE_ACK
				| HEARTBEAT | STATE_RESTORE
				| SIGNAL_PACKET | CONFIG_BLOB
		)
	}

	pub fn is_optional(tag: u8) -> bool {
		tag & 0x80 == 0x80
	}
}

/// Frames larger than this are rejected without buffering.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Logical stream a frame travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamId {
	Control = 0,
	Data = 1,
	Config = 2,
}

impl TryFrom<u8> for StreamId {
	type Error = DeserializeError;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::Control),
			1 => Ok(Self::Data),
			2 => Ok(Self::Config),
			other => Err(DeserializeError::InvalidStreamId(other)),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
	Data = 0,
	Event = 1,
}

impl TryFrom<u8> for PacketKind {
	type Error = DeserializeError;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::Data),
			1 => Ok(Self::Event),
			other => Err(DeserializeError::InvalidKind(other)),
		}
	}
}

/// One packet on a signal's stream: sample data, or a signal event.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamPacket {
	pub kind: PacketKind,
	pub payload: Bytes,
}

impl StreamPacket {
	pub fn data(payload: impl Into<Bytes>) -> Self {
		Self {
			kind: PacketKind::Data,
			payload: payload.into(),
		}
	}

	pub fn event(payload: impl Into<Bytes>) -> Self {
		Self {
			kind: PacketKind::Event,
			payload: payload.into(),
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
	SignalAvailable {
		global_id: String,
		serialized_signal: String,
	},
	SignalUnavailable {
		global_id: String,
	},
	Subscribe {
		global_id: String,
		request_id: u16,
	},
	Unsubscribe {
		global_id: String,
		request_id: u16,
	},
	SubscribeAck {
		global_id: String,
		request_id: u16,
		ok: bool,
	},
	UnsubscribeAck {
		global_id: String,
		request_id: u16,
		ok: bool,
	},
	Heartbeat,
	/// Full advertised set in insertion order, sent once per accepted
	/// connection before anything else.
	StateRestore {
		signals: Vec<(String, String)>,
	},
	SignalPacket {
		global_id: String,
		packet: StreamPacket,
	},
	ConfigBlob {
		payload: Bytes,
	},
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
	SignalAvailable,
	SignalUnavailable,
	Subscribe,
	Unsubscribe,
	SubscribeAck,
	UnsubscribeAck,
	Heartbeat,
	StateRestore,
	SignalPacket,
	ConfigBlob,
}

#[derive(Debug)]
pub enum DeserializeError {
	Incomplete,
	MalformedLength,
	InvalidStreamId(u8),
	UnknownTag(u8),
	InvalidKind(u8),
	MalformedPacket(&'static str),
	FromUtf8Error(FromUtf8Error),
}

impl From<FromUtf8Error> for DeserializeError {
	fn from(value: FromUtf8Error) -> Self {
		Self::FromUtf8Error(value)
	}
}

impl fmt::Display for DeserializeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?}")
	}
}

impl error::Error for DeserializeError {}

#[derive(Debug)]
pub struct SerializeError;

impl fmt::Display for SerializeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?}")
	}
}

impl error::Error for SerializeError {}

impl Packet {
	/// Checks if a complete frame can be decoded from `src`.
	///
	/// On success the cursor is positioned at the end of the frame; the
	/// position is the number of bytes the frame occupies.
	pub fn check(src: &mut io::Cursor<&[u8]>) -> Result<(), DeserializeError> {
		let len = get_u32le(src)? as usize;
		if len < 2 || len > MAX_FRAME_LEN {
			return Err(DeserializeError::MalformedLength);
		}
		if src.remaining() < len {
			return Err(DeserializeError::Incomplete);
		}

		let stream_id = get_u8(src)?;
		let tag = get_u8(src)?;
		StreamId::try_from(stream_id)?;
		if !tag::is_known(tag) && !tag::is_optional(tag) {
			return Err(DeserializeError::UnknownTag(tag));
		}

		src.advance(len - 2);
		Ok(())
	}

	/// Decodes one frame from `src`.
	///
	/// Returns `None` for well-formed frames carrying an unknown optional
	/// tag; those are skipped to preserve forward compatibility.
	pub fn parse(src: &mut io::Cursor<&[u8]>) -> Result<Option<Self>, DeserializeError> {
		let len = get_u32le(src)? as usize;
		if len < 2 || len > MAX_FRAME_LEN {
			return Err(DeserializeError::MalformedLength);
		}

		let stream_id = StreamId::try_from(get_u8(src)?)?;
		let tag = get_u8(src)?;
		let mut reader = BytesReader::new(take_bytes(src, len - 2)?);

		let packet = match tag {
			tag::SIGNAL_AVAILABLE => {
				expect_stream(stream_id, StreamId::Control)?;
				Self::SignalAvailable {
					global_id: reader.take_str()?,
					serialized_signal: reader.take_str()?,
				}
			}
			tag::SIGNAL_UNAVAILABLE => {
				expect_stream(stream_id, StreamId::Control)?;
				Self::SignalUnavailable {
					global_id: reader.take_str()?,
				}
			}
			tag::SUBSCRIBE => {
				expect_stream(stream_id, StreamId::Control)?;
				Self::Subscribe {
					global_id: reader.take_str()?,
					request_id: reader.take_u16()?,
				}
			}
			tag::UNSUBSCRIBE => {
				expect_stream(stream_id, StreamId::Control)?;
				Self::Unsubscribe {
					global_id: reader.take_str()?,
					request_id: reader.take_u16()?,
				}
			}
			tag::SUBSCRIBE_ACK => {
				expect_stream(stream_id, StreamId::Control)?;
				Self::SubscribeAck {
					global_id: reader.take_str()?,
					request_id: reader.take_u16()?,
					ok: reader.take_bool()?,
				}
			}
			tag::UNSUBSCRIBE_ACK => {
				expect_stream(stream_id, StreamId::Control)?;
				Self::UnsubscribeAck {
					global_id: reader.take_str()?,
					request_id: reader.take_u16()?,
					ok: reader.take_bool()?,
				}
			}
			tag::HEARTBEAT => {
				expect_stream(stream_id, StreamId::Control)?;
				Self::Heartbeat
			}
			tag::STATE_RESTORE => {
				expect_stream(stream_id, StreamId::Control)?;
				let count = reader.take_u16()?;
				let mut signals = Vec::with_capacity(count.into());
				for _ in 0..count {
					let global_id = reader.take_str()?;
					let serialized_signal = reader.take_str()?;
					signals.push((global_id, serialized_signal));
				}
				Self::StateRestore { signals }
			}
			tag::SIGNAL_PACKET => {
				expect_stream(stream_id, StreamId::Data)?;
				let global_id = reader.take_str()?;
				let kind = PacketKind::try_from(reader.take_u8()?)?;
				Self::SignalPacket {
					global_id,
					packet: StreamPacket {
						kind,
						payload: reader.take_inner(),
					},
				}
			}
			tag::CONFIG_BLOB => {
				expect_stream(stream_id, StreamId::Config)?;
				Self::ConfigBlob {
					payload: reader.take_inner(),
				}
			}
			unknown if tag::is_optional(unknown) => return Ok(None),
			unknown => return Err(DeserializeError::UnknownTag(unknown)),
		};

		Ok(Some(packet))
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
		let len = 2 + self.payload_len()?;
		if len > MAX_FRAME_LEN {
			return Err(SerializeError);
		}

		put_u32le(dst, len as u32)?;
		put_u8(dst, self.stream_id() as u8)?;
		put_u8(dst, self.tag())?;

		match self {
			Self::SignalAvailable {
				global_id,
				serialized_signal,
			} => {
				put_str(dst, global_id)?;
				put_str(dst, serialized_signal)?;
			}
			Self::SignalUnavailable { global_id } => {
				put_str(dst, global_id)?;
			}
			Self::Subscribe {
				global_id,
				request_id,
			}
			| Self::Unsubscribe {
				global_id,
				request_id,
			} => {
				put_str(dst, global_id)?;
				put_u16(dst, *request_id)?;
			}
			Self::SubscribeAck {
				global_id,
				request_id,
				ok,
			}
			| Self::UnsubscribeAck {
				global_id,
				request_id,
				ok,
			} => {
				put_str(dst, global_id)?;
				put_u16(dst, *request_id)?;
				put_u8(dst, u8::from(*ok))?;
			}
			Self::Heartbeat => {}
			Self::StateRestore { signals } => {
				let count = u16::try_from(signals.len()).map_err(|_| SerializeError)?;
				put_u16(dst, count)?;
				for (global_id, serialized_signal) in signals {
					put_str(dst, global_id)?;
					put_str(dst, serialized_signal)?;
				}
			}
			Self::SignalPacket { global_id, packet } => {
				put_str(dst, global_id)?;
				put_u8(dst, packet.kind as u8)?;
				put_slice(dst, &packet.payload)?;
			}
			Self::ConfigBlob { payload } => {
				put_slice(dst, payload)?;
			}
		}

		Ok(())
	}

	/// The logical stream this packet travels on.
	pub fn stream_id(&self) -> StreamId {
		match self {
			Self::SignalPacket { .. } => StreamId::Data,
			Self::ConfigBlob { .. } => StreamId::Config,
			_ => StreamId::Control,
		}
	}

	pub fn packet_type(&self) -> PacketType {
		match self {
			Self::SignalAvailable { .. } => PacketType::SignalAvailable,
			Self::SignalUnavailable { .. } => PacketType::SignalUnavailable,
			Self::Subscribe { .. } => PacketType::Subscribe,
			Self::Unsubscribe { .. } => PacketType::Unsubscribe,
			Self::SubscribeAck { .. } => PacketType::SubscribeAck,
			Self::UnsubscribeAck { .. } => PacketType::UnsubscribeAck,
			Self::Heartbeat => PacketType::Heartbeat,
			Self::StateRestore { .. } => PacketType::StateRestore,
			Self::SignalPacket { .. } => PacketType::SignalPacket,
			Self::ConfigBlob { .. } => PacketType::ConfigBlob,
		}
	}

	fn tag(&self) -> u8 {
		match self {
			Self::SignalAvailable { .. } => tag::SIGNAL_AVAILABLE,
			Self::SignalUnavailable { .. } => tag::SIGNAL_UNAVAILABLE,
			Self::Subscribe { .. } => tag::SUBSCRIBE,
			Self::Unsubscribe { .. } => tag::UNSUBSCRIBE,
			Self::SubscribeAck { .. } => tag::SUBSCRIBE_ACK,
			Self::UnsubscribeAck { .. } => tag::UNSUBSCRIBE_ACK,
			Self::Heartbeat => tag::HEARTBEAT,
			Self::StateRestore { .. } => tag::STATE_RESTORE,
			Self::SignalPacket { .. } => tag::SIGNAL_PACKET,
			Self::ConfigBlob { .. } => tag::CONFIG_BLOB,
		}
	}

	fn payload_len(&self) -> Result<usize, SerializeError> {
		let len = match self {
			Self::SignalAvailable {
				global_id,
				serialized_signal,
			} => str_len(global_id)? + str_len(serialized_signal)?,
			Self::SignalUnavailable { global_id } => str_len(global_id)?,
			Self::Subscribe { global_id, .. } | Self::Unsubscribe { global_id, .. } => {
				str_len(global_id)? + 2
			}
			Self::SubscribeAck { global_id, .. } | Self::UnsubscribeAck { global_id, .. } => {
				str_len(global_id)? + 3
			}
			Self::Heartbeat => 0,
			Self::StateRestore { signals } => {
				let mut len = 2;
				for (global_id, serialized_signal) in signals {
					len += str_len(global_id)? + str_len(serialized_signal)?;
				}
				len
			}
			Self::SignalPacket { global_id, packet } => {
				str_len(global_id)? + 1 + packet.payload.len()
			}
			Self::ConfigBlob { payload } => payload.len(),
		};
		Ok(len)
	}
}

fn expect_stream(actual: StreamId, expected: StreamId) -> Result<(), DeserializeError> {
	if actual == expected {
		Ok(())
	} else {
		Err(DeserializeError::MalformedPacket(
			"packet sent on the wrong stream",
		))
	}
}

fn str_len(s: &str) -> Result<usize, SerializeError> {
	if s.len() > u16::MAX as usize {
		return Err(SerializeError);
	}
	Ok(2 + s.len())
}

fn get_u8(src: &mut io::Cursor<&[u8]>) -> Result<u8, DeserializeError> {
	if !src.has_remaining() {
		return Err(DeserializeError::Incomplete);
	}
	Ok(src.get_u8())
}

fn get_u32le(src: &mut io::Cursor<&[u8]>) -> Result<u32, DeserializeError> {
	if src.remaining() < mem::size_of::<u32>() {
		return Err(DeserializeError::Incomplete);
	}
	Ok(src.get_u32_le())
}

fn take_bytes(src: &mut io::Cursor<&[u8]>, len: usize) -> Result<Bytes, DeserializeError> {
	if src.remaining() < len {
		return Err(DeserializeError::Incomplete);
	}
	Ok(src.copy_to_bytes(len))
}

fn require_mut(dst: &impl BufMut, len: usize) -> Result<(), SerializeError> {
	if dst.remaining_mut() < len {
		Err(SerializeError)
	} else {
		Ok(())
	}
}

fn put_u8(dst: &mut impl BufMut, val: u8) -> Result<(), SerializeError> {
	require_mut(dst, mem::size_of::<u8>())?;
	dst.put_u8(val);
	Ok(())
}

fn put_u16(dst: &mut impl BufMut, val: u16) -> Result<(), SerializeError> {
	require_mut(dst, mem::size_of::<u16>())?;
	dst.put_u16(val);
	Ok(())
}

fn put_u32le(dst: &mut impl BufMut, val: u32) -> Result<(), SerializeError> {
	require_mut(dst, mem::size_of::<u32>())?;
	dst.put_u32_le(val);
	Ok(())
}

fn put_slice(dst: &mut impl BufMut, slice: &[u8]) -> Result<(), SerializeError> {
	require_mut(dst, slice.len())?;
	dst.put_slice(slice);
	Ok(())
}

fn put_str(dst: &mut impl BufMut, s: &str) -> Result<(), SerializeError> {
	if s.len() > u16::MAX as usize {
		return Err(SerializeError);
	}
	put_u16(dst, s.len() as u16)?;
	put_slice(dst, s.as_bytes())
}
