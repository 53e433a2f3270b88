use super::{session, ServerConfig};
use crate::{connection::Connection, signal::StreamedSignal};
use bytes::Bytes;
use daqns_core::{EventPacket, Packet, PacketKind, StreamPacket};
use std::{
	collections::{HashMap, HashSet},
	io,
	net::SocketAddr,
	sync::{Arc, Mutex, Weak},
	time::Instant,
};
use thiserror::Error;
use tokio::{
	net::{TcpListener, TcpSocket, TcpStream},
	sync::{mpsc, watch},
	task::JoinHandle,
};

pub type OnSignalSubscribed = Arc<dyn Fn(&Arc<StreamedSignal>) + Send + Sync>;
pub type OnSignalUnsubscribed = Arc<dyn Fn(&Arc<StreamedSignal>) + Send + Sync>;

/// Per-session handler for inbound configuration-protocol packets.
pub type ConfigRequestHandler = Box<dyn FnMut(Bytes) + Send>;

/// Invoked once per accepted connection; the returned handler receives that
/// session's configuration-protocol requests and may reply through the
/// provided sender at any time.
pub type SetUpConfigProtocolServer =
	Arc<dyn Fn(ConfigPacketSender) -> ConfigRequestHandler + Send + Sync>;

#[derive(Clone, Default)]
pub struct ServerHooks {
	/// Fired when a signal's subscription counter transitions 0 -> 1.
	pub on_signal_subscribed: Option<OnSignalSubscribed>,

	/// Fired when a signal's subscription counter transitions 1 -> 0.
	pub on_signal_unsubscribed: Option<OnSignalUnsubscribed>,

	pub set_up_config_protocol_server: Option<SetUpConfigProtocolServer>,
}

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("server is already running")]
	AlreadyRunning,
	#[error(transparent)]
	Io(#[from] io::Error),
}

/// Handle for pushing configuration-protocol packets to one session.
#[derive(Clone)]
pub struct ConfigPacketSender {
	outbound: mpsc::Sender<Packet>,
}

impl ConfigPacketSender {
	pub fn send(&self, payload: Bytes) {
		let packet = Packet::ConfigBlob { payload };
		if self.outbound.try_send(packet).is_err() {
			tracing::warn!("config packet dropped, session queue full or closed");
		}
	}
}

/// Snapshot of one connected session.
#[derive(Clone, Debug)]
pub struct SessionInfo {
	pub remote_addr: SocketAddr,
	pub connected_at: Instant,
	pub subscribed: Vec<String>,
}

pub(crate) type SessionId = u64;

struct SessionEntry {
	outbound: mpsc::Sender<Packet>,
	subscribed: HashSet<String>,
	remote_addr: SocketAddr,
	connected_at: Instant,
	task: Option<JoinHandle<()>>,
}

impl SessionEntry {
	fn enqueue(&self, packet: Packet) {
		match self.outbound.try_send(packet) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(packet)) => {
				tracing::warn!(
					packet_type = ?packet.packet_type(),
					remote_addr = %self.remote_addr,
					"session send queue full, dropping frame"
				);
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {}
		}
	}
}

struct ListenerState {
	shutdown: watch::Sender<bool>,
	accept_task: JoinHandle<()>,
}

#[derive(Default)]
struct ServerState {
	/// Advertised set, in insertion order. Only public signals live here.
	advertised: Vec<Arc<StreamedSignal>>,

	/// Latest descriptor-changed event per signal, replayed to new
	/// subscribers before any data packet.
	initial_events: HashMap<String, StreamPacket>,

	sessions: HashMap<SessionId, SessionEntry>,

	/// Per-signal count of subscribed sessions.
	counters: HashMap<String, usize>,

	next_session_id: SessionId,
	listener: Option<ListenerState>,
}

pub(crate) struct Shared {
	state: Mutex<ServerState>,
	hooks: ServerHooks,
	config: ServerConfig,
}

/// Server side of the native streaming protocol: owns the session registry,
/// the advertised signal catalogue and the per-signal subscription counter.
#[derive(Clone)]
pub struct ServerHandler {
	shared: Arc<Shared>,
}

impl ServerHandler {
	pub fn new(
		config: ServerConfig,
		initial_signals: Vec<Arc<StreamedSignal>>,
		hooks: ServerHooks,
	) -> Self {
		let mut state = ServerState::default();
		for signal in initial_signals {
			if !signal.is_public() {
				continue;
			}
			if find_advertised(&state.advertised, signal.global_id()).is_some() {
				continue;
			}
			seed_initial_event(&mut state, &signal);
			state.advertised.push(signal);
		}

		Self {
			shared: Arc::new(Shared {
				state: Mutex::new(state),
				hooks,
				config,
			}),
		}
	}

	/// Binds the listening socket and starts accepting clients. Returns the
	/// bound port, which differs from `port` only when asked for port 0.
	#[tracing::instrument(skip(self), err)]
	pub async fn start_server(&self, port: u16) -> Result<u16, ServerError> {
		if self.shared.state.lock().unwrap().listener.is_some() {
			return Err(ServerError::AlreadyRunning);
		}

		let socket = TcpSocket::new_v4()?;
		socket.set_reuseaddr(true)?;
		socket.bind(SocketAddr::from(([0, 0, 0, 0], port)))?;
		let listener = socket.listen(1024)?;
		let local_port = listener.local_addr()?.port();

		let (shutdown, shutdown_rx) = watch::channel(false);
		let accept_task = tokio::spawn(accept_loop(
			Arc::downgrade(&self.shared),
			listener,
			shutdown_rx,
		));

		let mut state = self.shared.state.lock().unwrap();
		if state.listener.is_some() {
			accept_task.abort();
			return Err(ServerError::AlreadyRunning);
		}
		state.listener = Some(ListenerState {
			shutdown,
			accept_task,
		});

		tracing::info!(port = local_port, "server started");
		Ok(local_port)
	}

	/// Refuses new connections and closes every active session. Idempotent;
	/// also runs when the handler is dropped.
	pub async fn stop_server(&self) {
		let Some(listener) = self.shared.state.lock().unwrap().listener.take() else {
			return;
		};

		let _ = listener.shutdown.send(true);
		let _ = listener.accept_task.await;

		let session_tasks: Vec<JoinHandle<()>> = {
			let mut state = self.shared.state.lock().unwrap();
			state
				.sessions
				.values_mut()
				.filter_map(|entry| entry.task.take())
				.collect()
		};
		for task in session_tasks {
			let _ = task.await;
		}

		tracing::info!("server stopped");
	}

	/// Appends a public signal to the advertised set and announces it on
	/// every live session. Idempotent on duplicate global id; non-public
	/// signals are never advertised.
	pub fn add_signal(&self, signal: &Arc<StreamedSignal>) {
		if !signal.is_public() {
			tracing::debug!(global_id = signal.global_id(), "skipping non-public signal");
			return;
		}

		let mut state = self.shared.state.lock().unwrap();
		if find_advertised(&state.advertised, signal.global_id()).is_some() {
			return;
		}

		tracing::info!(global_id = signal.global_id(), "signal added");
		seed_initial_event(&mut state, signal);
		state.advertised.push(signal.clone());

		let available = Packet::SignalAvailable {
			global_id: signal.global_id().to_owned(),
			serialized_signal: signal.serialized().to_owned(),
		};
		let initial = state.initial_events.get(signal.global_id()).cloned();
		for entry in state.sessions.values() {
			entry.enqueue(available.clone());
			if let Some(initial) = &initial {
				entry.enqueue(Packet::SignalPacket {
					global_id: signal.global_id().to_owned(),
					packet: initial.clone(),
				});
			}
		}
	}

	/// Removes the signal with id `prefix` and every signal nested under it,
	/// announcing each removal in order. Subscribed removals drive the
	/// counter to zero and fire the unsubscribe hook.
	pub fn remove_component_signals(&self, prefix: &str) {
		let mut unsubscribed = Vec::new();
		{
			let mut state = self.shared.state.lock().unwrap();
			let state = &mut *state;

			let mut removed = Vec::new();
			state.advertised.retain(|signal| {
				if removes_signal(prefix, signal.global_id()) {
					removed.push(signal.clone());
					false
				} else {
					true
				}
			});

			for signal in removed {
				let global_id = signal.global_id();
				tracing::info!(global_id, "signal removed");
				state.initial_events.remove(global_id);

				for entry in state.sessions.values_mut() {
					entry.subscribed.remove(global_id);
				}
				if state.counters.remove(global_id).is_some_and(|count| count > 0) {
					unsubscribed.push(signal.clone());
				}

				let unavailable = Packet::SignalUnavailable {
					global_id: global_id.to_owned(),
				};
				for entry in state.sessions.values() {
					entry.enqueue(unavailable.clone());
				}
			}
		}

		for signal in unsubscribed {
			self.shared.fire_unsubscribed(&signal);
		}
	}

	/// Fans a packet out to every session subscribed to `signal`. Dropped
	/// silently when nobody is subscribed. Descriptor-changed event packets
	/// refresh the signal's initial-event cache.
	pub fn send_packet(&self, signal: &Arc<StreamedSignal>, packet: StreamPacket) {
		let global_id = signal.global_id();
		let mut state = self.shared.state.lock().unwrap();
		let state = &mut *state;

		if find_advertised(&state.advertised, global_id).is_none() {
			tracing::debug!(global_id, "dropping packet for unadvertised signal");
			return;
		}

		if packet.kind == PacketKind::Event {
			if let Ok(event) = EventPacket::from_payload(&packet.payload) {
				if event.changes_descriptor() {
					state
						.initial_events
						.insert(global_id.to_owned(), packet.clone());
				}
			}
		}

		for entry in state.sessions.values() {
			if entry.subscribed.contains(global_id) {
				entry.enqueue(Packet::SignalPacket {
					global_id: global_id.to_owned(),
					packet: packet.clone(),
				});
			}
		}
	}

	/// Current advertised set, in insertion order.
	pub fn advertised_signals(&self) -> Vec<Arc<StreamedSignal>> {
		self.shared.state.lock().unwrap().advertised.clone()
	}

	/// Number of sessions currently subscribed to `global_id`.
	pub fn subscriber_count(&self, global_id: &str) -> usize {
		self.shared
			.state
			.lock()
			.unwrap()
			.counters
			.get(global_id)
			.copied()
			.unwrap_or(0)
	}

	pub fn sessions(&self) -> Vec<SessionInfo> {
		let state = self.shared.state.lock().unwrap();
		state
			.sessions
			.values()
			.map(|entry| SessionInfo {
				remote_addr: entry.remote_addr,
				connected_at: entry.connected_at,
				subscribed: entry.subscribed.iter().cloned().collect(),
			})
			.collect()
	}
}

impl Shared {
	fn accept_session(
		self: &Arc<Self>,
		socket: TcpStream,
		remote_addr: SocketAddr,
		shutdown: watch::Receiver<bool>,
	) {
		let (outbound_tx, outbound_rx) = mpsc::channel(self.config.session_queue_capacity);

		let session_id = {
			let mut state = self.state.lock().unwrap();
			let state = &mut *state;

			let session_id = state.next_session_id;
			state.next_session_id += 1;

			let entry = SessionEntry {
				outbound: outbound_tx.clone(),
				subscribed: HashSet::new(),
				remote_addr,
				connected_at: Instant::now(),
				task: None,
			};

			// The full advertised set travels as one StateRestore frame,
			// followed by the known initial events. Enqueued under the state
			// lock so a concurrent add_signal cannot interleave.
			entry.enqueue(Packet::StateRestore {
				signals: state
					.advertised
					.iter()
					.map(|signal| {
						(
							signal.global_id().to_owned(),
							signal.serialized().to_owned(),
						)
					})
					.collect(),
			});
			for signal in &state.advertised {
				if let Some(initial) = state.initial_events.get(signal.global_id()) {
					entry.enqueue(Packet::SignalPacket {
						global_id: signal.global_id().to_owned(),
						packet: initial.clone(),
					});
				}
			}

			state.sessions.insert(session_id, entry);
			session_id
		};

		let config_handler = self
			.hooks
			.set_up_config_protocol_server
			.as_ref()
			.map(|set_up| {
				set_up(ConfigPacketSender {
					outbound: outbound_tx,
				})
			});

		tracing::info!(%remote_addr, session_id, "session accepted");
		let task = tokio::spawn(session::session_task(
			Arc::downgrade(self),
			session_id,
			Connection::new(socket),
			outbound_rx,
			config_handler,
			shutdown,
			self.config.clone(),
		));

		let mut state = self.state.lock().unwrap();
		if let Some(entry) = state.sessions.get_mut(&session_id) {
			entry.task = Some(task);
		}
	}

	pub(crate) fn unregister_session(&self, session_id: SessionId) {
		let mut unsubscribed = Vec::new();
		{
			let mut state = self.state.lock().unwrap();
			let state = &mut *state;

			let Some(entry) = state.sessions.remove(&session_id) else {
				return;
			};
			tracing::info!(remote_addr = %entry.remote_addr, session_id, "session closed");

			for global_id in entry.subscribed {
				if let Some(count) = state.counters.get_mut(&global_id) {
					*count -= 1;
					if *count == 0 {
						state.counters.remove(&global_id);
						if let Some(signal) = find_advertised(&state.advertised, &global_id) {
							unsubscribed.push(signal.clone());
						}
					}
				}
			}
		}

		for signal in unsubscribed {
			self.fire_unsubscribed(&signal);
		}
	}

	pub(crate) fn handle_subscribe(&self, session_id: SessionId, global_id: &str, request_id: u16) {
		let mut newly_subscribed = None;
		{
			let mut state = self.state.lock().unwrap();
			let state = &mut *state;

			let Some(signal) = find_advertised(&state.advertised, global_id).cloned() else {
				tracing::debug!(global_id, "subscribe for unknown signal");
				if let Some(entry) = state.sessions.get(&session_id) {
					entry.enqueue(Packet::SubscribeAck {
						global_id: global_id.to_owned(),
						request_id,
						ok: false,
					});
				}
				return;
			};

			let Some(entry) = state.sessions.get_mut(&session_id) else {
				return;
			};
			entry.enqueue(Packet::SubscribeAck {
				global_id: global_id.to_owned(),
				request_id,
				ok: true,
			});

			if entry.subscribed.insert(global_id.to_owned()) {
				// Replay the initial event ahead of any data packet; data
				// fan-out can only begin once the state lock is released.
				if let Some(initial) = state.initial_events.get(global_id) {
					entry.enqueue(Packet::SignalPacket {
						global_id: global_id.to_owned(),
						packet: initial.clone(),
					});
				}

				let count = state.counters.entry(global_id.to_owned()).or_insert(0);
				*count += 1;
				if *count == 1 {
					newly_subscribed = Some(signal);
				}
			}
		}

		if let Some(signal) = newly_subscribed {
			tracing::info!(global_id, "first subscriber");
			if let Some(hook) = &self.hooks.on_signal_subscribed {
				hook(&signal);
			}
		}
	}

	pub(crate) fn handle_unsubscribe(
		&self,
		session_id: SessionId,
		global_id: &str,
		request_id: u16,
	) {
		let mut no_subscribers = None;
		{
			let mut state = self.state.lock().unwrap();
			let state = &mut *state;

			let Some(entry) = state.sessions.get_mut(&session_id) else {
				return;
			};

			// Unsubscribing while not subscribed (or from an unknown signal)
			// is a no-op ack.
			entry.enqueue(Packet::UnsubscribeAck {
				global_id: global_id.to_owned(),
				request_id,
				ok: true,
			});

			if entry.subscribed.remove(global_id) {
				if let Some(count) = state.counters.get_mut(global_id) {
					*count -= 1;
					if *count == 0 {
						state.counters.remove(global_id);
						if let Some(signal) = find_advertised(&state.advertised, global_id) {
							no_subscribers = Some(signal.clone());
						}
					}
				}
			}
		}

		if let Some(signal) = no_subscribers {
			tracing::info!(global_id, "last subscriber gone");
			self.fire_unsubscribed(&signal);
		}
	}

	fn fire_unsubscribed(&self, signal: &Arc<StreamedSignal>) {
		if let Some(hook) = &self.hooks.on_signal_unsubscribed {
			hook(signal);
		}
	}
}

impl Drop for Shared {
	fn drop(&mut self) {
		if let Ok(mut state) = self.state.lock() {
			if let Some(listener) = state.listener.take() {
				let _ = listener.shutdown.send(true);
				listener.accept_task.abort();
			}
			for entry in state.sessions.values_mut() {
				if let Some(task) = entry.task.take() {
					task.abort();
				}
			}
		}
	}
}

async fn accept_loop(
	shared: Weak<Shared>,
	listener: TcpListener,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			changed = shutdown.changed() => {
				if changed.is_err() || *shutdown.borrow() {
					break;
				}
			}
			accepted = listener.accept() => match accepted {
				Ok((socket, remote_addr)) => {
					let Some(shared) = shared.upgrade() else {
						break;
					};
					shared.accept_session(socket, remote_addr, shutdown.clone());
				}
				Err(error) => {
					tracing::warn!(%error, "accept failed");
				}
			},
		}
	}
	tracing::debug!("accept loop finished");
}

fn find_advertised<'a>(
	advertised: &'a [Arc<StreamedSignal>],
	global_id: &str,
) -> Option<&'a Arc<StreamedSignal>> {
	advertised
		.iter()
		.find(|signal| signal.global_id() == global_id)
}

/// A removal of `prefix` removes the signal with that exact id and every
/// signal whose id is nested under it.
fn removes_signal(prefix: &str, global_id: &str) -> bool {
	global_id == prefix
		|| global_id
			.strip_prefix(prefix)
			.is_some_and(|rest| rest.starts_with('/'))
}

fn seed_initial_event(state: &mut ServerState, signal: &Arc<StreamedSignal>) {
	if signal.descriptor().data_descriptor.is_null() {
		return;
	}
	let event = EventPacket::data_descriptor_changed(signal.descriptor().data_descriptor.clone());
	match event.to_stream_packet() {
		Ok(packet) => {
			state
				.initial_events
				.insert(signal.global_id().to_owned(), packet);
		}
		Err(error) => {
			tracing::warn!(%error, global_id = signal.global_id(), "initial event not cached");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prefix_removal_respects_separators() {
		assert!(removes_signal("/root/dev0", "/root/dev0"));
		assert!(removes_signal("/root/dev0", "/root/dev0/ch1/sig"));
		assert!(!removes_signal("/root/dev0", "/root/dev01/sig"));
		assert!(!removes_signal("/root/dev0/ch1/sig", "/root/dev0"));
	}
}
