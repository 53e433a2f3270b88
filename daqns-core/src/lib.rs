pub mod bytes_reader;
mod descriptor;
mod event;
mod packet;
mod url;

pub use descriptor::SignalDescriptor;
pub use event::{EventPacket, DATA_DESCRIPTOR_CHANGED};
pub use packet::{
	DeserializeError, Packet, PacketKind, PacketType, SerializeError, StreamId, StreamPacket,
	MAX_FRAME_LEN,
};
pub use url::{DeviceUrl, InvalidDeviceUrl};

/// Canonical listening port for native streaming servers.
pub const DEFAULT_PORT: u16 = 7420;

/// Protocol id carried in server-published streaming advertisements.
pub const STREAMING_PROTOCOL_ID: &str = "daq.ns";

/// Connection-string prefix for client device URLs.
pub const DEVICE_PREFIX: &str = "daq.nsd://";
