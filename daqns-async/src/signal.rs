use bytes::Bytes;
use daqns_core::{EventPacket, SignalDescriptor, StreamPacket};
use std::{
	collections::VecDeque,
	sync::{Arc, Mutex},
};

/// A server-side signal advertised over the protocol.
///
/// External producers push packets into the signal's queue; the packet pump
/// drains the queue while at least one session is subscribed. Non-public
/// signals can exist in the object tree but are never advertised.
#[derive(Debug)]
pub struct StreamedSignal {
	descriptor: SignalDescriptor,
	serialized: String,
	queue: Mutex<VecDeque<StreamPacket>>,
}

impl StreamedSignal {
	pub fn new(descriptor: SignalDescriptor) -> Result<Arc<Self>, serde_json::Error> {
		let serialized = descriptor.to_json()?;
		Ok(Arc::new(Self {
			descriptor,
			serialized,
			queue: Mutex::new(VecDeque::new()),
		}))
	}

	pub fn global_id(&self) -> &str {
		&self.descriptor.global_id
	}

	pub fn descriptor(&self) -> &SignalDescriptor {
		&self.descriptor
	}

	pub fn serialized(&self) -> &str {
		&self.serialized
	}

	pub fn is_public(&self) -> bool {
		self.descriptor.public
	}

	/// Queues a packet for the pump to pick up.
	pub fn push_packet(&self, packet: StreamPacket) {
		self.queue.lock().unwrap().push_back(packet);
	}

	pub fn push_data(&self, payload: impl Into<Bytes>) {
		self.push_packet(StreamPacket::data(payload));
	}

	pub fn push_event(&self, event: &EventPacket) -> Result<(), serde_json::Error> {
		self.push_packet(event.to_stream_packet()?);
		Ok(())
	}
}

/// Pull handle over one signal's packet queue.
#[derive(Debug)]
pub struct PacketReader {
	signal: Arc<StreamedSignal>,
}

impl PacketReader {
	pub fn new(signal: Arc<StreamedSignal>) -> Self {
		Self { signal }
	}

	pub fn read(&self) -> Option<StreamPacket> {
		self.signal.queue.lock().unwrap().pop_front()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reader_drains_in_push_order() {
		let signal = StreamedSignal::new(SignalDescriptor::new("/root/sig")).unwrap();
		signal.push_data(vec![1u8]);
		signal.push_data(vec![2u8]);

		let reader = PacketReader::new(signal.clone());
		assert_eq!(reader.read().unwrap().payload.as_ref(), &[1]);
		assert_eq!(reader.read().unwrap().payload.as_ref(), &[2]);
		assert!(reader.read().is_none());
	}
}
