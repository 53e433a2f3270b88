use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_public() -> bool {
	true
}

/// Deserialized form of the serialized signal carried by announcements.
///
/// The wire form is JSON. Clients keep the original serialized string next to
/// the parsed descriptor so that re-serialization is byte-identical; the
/// `domainSignalId` link is stored as a plain id and resolved through the
/// mirror set on access, which tolerates out-of-order announcements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDescriptor {
	pub global_id: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,

	#[serde(default = "default_public")]
	pub public: bool,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub domain_signal_id: Option<String>,

	/// Opaque data-descriptor document; the protocol never looks inside.
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub data_descriptor: Value,
}

impl SignalDescriptor {
	pub fn new(global_id: impl Into<String>) -> Self {
		Self {
			global_id: global_id.into(),
			name: None,
			description: None,
			public: true,
			domain_signal_id: None,
			data_descriptor: Value::Null,
		}
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	pub fn with_public(mut self, public: bool) -> Self {
		self.public = public;
		self
	}

	pub fn with_domain_signal(mut self, domain_signal_id: impl Into<String>) -> Self {
		self.domain_signal_id = Some(domain_signal_id.into());
		self
	}

	pub fn with_data_descriptor(mut self, data_descriptor: Value) -> Self {
		self.data_descriptor = data_descriptor;
		self
	}

	pub fn from_json(serialized: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(serialized)
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}
