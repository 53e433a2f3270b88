use daqns_core::{Packet, SignalDescriptor};
use std::collections::HashMap;

/// Client-side stand-in for a remote signal.
///
/// The original serialized descriptor is kept verbatim so re-serialization
/// is byte-identical; the domain-signal link stays a global id and is
/// resolved through the mirror set on access.
#[derive(Clone, Debug)]
pub(crate) struct MirrorSignal {
	pub serialized: String,
	pub descriptor: SignalDescriptor,

	/// Desired subscription state, as driven by subscribe/unsubscribe calls.
	/// Restored on the wire after a reconnection.
	pub subscribed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RequestKind {
	Subscribe,
	Unsubscribe,
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
	pub global_id: String,
	pub kind: RequestKind,
}

/// Outcome of applying a `StateRestore` announcement against the mirror.
#[derive(Debug, Default)]
pub(crate) struct RestoreDiff {
	/// Present before, absent now.
	pub removed: Vec<String>,
	/// Absent before, present now, in server order: (global id, serialized).
	pub added: Vec<(String, String)>,
	/// Retained signals that were subscribed before the drop.
	pub resubscribe: Vec<String>,
}

/// Mirror of the server-announced signal set plus in-flight subscription
/// requests.
#[derive(Debug, Default)]
pub(crate) struct ClientState {
	mirror: HashMap<String, MirrorSignal>,
	pending: HashMap<u16, PendingRequest>,
	pending_by_id: HashMap<String, u16>,
	request_id: u16,
}

impl ClientState {
	/// Materialises a mirror entry from an announcement. Returns `false`
	/// when the descriptor does not parse; the signal is then ignored.
	pub fn signal_available(&mut self, global_id: &str, serialized: &str) -> bool {
		let descriptor = match SignalDescriptor::from_json(serialized) {
			Ok(descriptor) => descriptor,
			Err(error) => {
				tracing::warn!(%error, global_id, "ignoring signal with malformed descriptor");
				return false;
			}
		};

		self.mirror.insert(
			global_id.to_owned(),
			MirrorSignal {
				serialized: serialized.to_owned(),
				descriptor,
				subscribed: false,
			},
		);
		true
	}

	pub fn signal_unavailable(&mut self, global_id: &str) -> bool {
		if let Some(request_id) = self.pending_by_id.remove(global_id) {
			self.pending.remove(&request_id);
		}
		self.mirror.remove(global_id).is_some()
	}

	/// Diffs a fresh announcement burst against the mirror. Retained ids keep
	/// their entry (same identity); vanished and new ids are reported for the
	/// unavailable/available callbacks.
	pub fn apply_state_restore(&mut self, signals: &[(String, String)]) -> RestoreDiff {
		let mut diff = RestoreDiff::default();

		diff.removed = self
			.mirror
			.keys()
			.filter(|known| !signals.iter().any(|(global_id, _)| global_id == *known))
			.cloned()
			.collect();
		diff.removed.sort();
		for global_id in &diff.removed {
			self.signal_unavailable(global_id);
		}

		for (global_id, serialized) in signals {
			match self.mirror.get_mut(global_id) {
				Some(existing) => {
					if existing.serialized != *serialized {
						if let Ok(descriptor) = SignalDescriptor::from_json(serialized) {
							existing.serialized = serialized.clone();
							existing.descriptor = descriptor;
						}
					}
					if existing.subscribed {
						diff.resubscribe.push(global_id.clone());
					}
				}
				None => {
					if self.signal_available(global_id, serialized) {
						diff.added.push((global_id.clone(), serialized.clone()));
					}
				}
			}
		}

		diff
	}

	/// Builds the wire request for a subscribe call, or `None` when an
	/// identical request is already in flight.
	pub fn subscribe(&mut self, global_id: &str) -> Option<Packet> {
		self.set_subscribed(global_id, true);
		let request_id = self.begin_request(global_id, RequestKind::Subscribe)?;
		Some(Packet::Subscribe {
			global_id: global_id.to_owned(),
			request_id,
		})
	}

	pub fn unsubscribe(&mut self, global_id: &str) -> Option<Packet> {
		self.set_subscribed(global_id, false);
		let request_id = self.begin_request(global_id, RequestKind::Unsubscribe)?;
		Some(Packet::Unsubscribe {
			global_id: global_id.to_owned(),
			request_id,
		})
	}

	pub fn set_subscribed(&mut self, global_id: &str, subscribed: bool) {
		if let Some(signal) = self.mirror.get_mut(global_id) {
			signal.subscribed = subscribed;
		}
	}

	pub fn get(&self, global_id: &str) -> Option<&MirrorSignal> {
		self.mirror.get(global_id)
	}

	/// Resolves a mirror signal's domain link through the mirror set. The
	/// link is a global id, so a domain announced later (or never) is simply
	/// unresolved rather than a dangling handle.
	pub fn domain_of(&self, global_id: &str) -> Option<&MirrorSignal> {
		let domain_id = self.mirror.get(global_id)?.descriptor.domain_signal_id.as_deref()?;
		self.mirror.get(domain_id)
	}

	/// Resolves an in-flight request by id. `None` for unsolicited acks.
	pub fn resolve(&mut self, request_id: u16) -> Option<PendingRequest> {
		let pending = self.pending.remove(&request_id)?;
		if self.pending_by_id.get(&pending.global_id) == Some(&request_id) {
			self.pending_by_id.remove(&pending.global_id);
		}
		Some(pending)
	}

	/// Drops all in-flight requests; called when the session dies.
	pub fn clear_pending(&mut self) {
		if !self.pending.is_empty() {
			tracing::debug!(
				count = self.pending.len(),
				"dropping in-flight requests, session disconnected"
			);
		}
		self.pending.clear();
		self.pending_by_id.clear();
	}

	fn begin_request(&mut self, global_id: &str, kind: RequestKind) -> Option<u16> {
		if let Some(in_flight) = self.pending_by_id.get(global_id) {
			if self.pending.get(in_flight).map(|pending| pending.kind) == Some(kind) {
				return None;
			}
		}

		self.request_id = self.request_id.wrapping_add(1);
		self.pending.insert(
			self.request_id,
			PendingRequest {
				global_id: global_id.to_owned(),
				kind,
			},
		);
		self.pending_by_id.insert(global_id.to_owned(), self.request_id);
		Some(self.request_id)
	}
}
