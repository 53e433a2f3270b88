use crate::packet::StreamPacket;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Event id of the packet that establishes or changes a signal's data
/// descriptor. Servers cache the latest such packet per signal and replay it
/// to every newly subscribing session before any data packet.
pub const DATA_DESCRIPTOR_CHANGED: &str = "DataDescriptorChanged";

/// Body of an event packet. JSON on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventPacket {
	pub id: String,

	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub params: Value,
}

impl EventPacket {
	pub fn new(id: impl Into<String>, params: Value) -> Self {
		Self {
			id: id.into(),
			params,
		}
	}

	pub fn data_descriptor_changed(data_descriptor: Value) -> Self {
		Self {
			id: DATA_DESCRIPTOR_CHANGED.into(),
			params: json!({ "dataDescriptor": data_descriptor }),
		}
	}

	pub fn changes_descriptor(&self) -> bool {
		self.id == DATA_DESCRIPTOR_CHANGED
	}

	pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
		serde_json::from_slice(payload)
	}

	pub fn to_stream_packet(&self) -> Result<StreamPacket, serde_json::Error> {
		let payload = serde_json::to_vec(self)?;
		Ok(StreamPacket::event(Bytes::from(payload)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::packet::PacketKind;

	#[test]
	fn descriptor_changed_round_trip() {
		let event = EventPacket::data_descriptor_changed(json!({ "sampleType": "Float64" }));
		assert!(event.changes_descriptor());

		let packet = event.to_stream_packet().unwrap();
		assert_eq!(packet.kind, PacketKind::Event);

		let parsed = EventPacket::from_payload(&packet.payload).unwrap();
		assert_eq!(parsed, event);
	}

	#[test]
	fn other_events_do_not_change_descriptors() {
		let event = EventPacket::new("PropertyChanged", json!({ "name": "gain" }));
		assert!(!event.changes_descriptor());
	}
}
