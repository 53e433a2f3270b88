use super::{ClientCallbacks, ClientState, Command, HoldOff, ReconnectionStatus, TransportConfig};
use crate::connection::Connection;
use daqns_core::Packet;
use tokio::{
	net::TcpStream,
	sync::mpsc,
	time::{self, Instant},
};

enum SessionEnd {
	Shutdown,
	Failed,
}

#[tracing::instrument(skip_all, fields(host = %host, port = port))]
pub(crate) async fn client_task(
	mut connection: Connection,
	host: String,
	port: u16,
	config: TransportConfig,
	callbacks: ClientCallbacks,
	mut rx: mpsc::UnboundedReceiver<Command>,
) {
	let mut state = ClientState::default();
	let mut holdoff = HoldOff::new(config.reconnect_holdoff.clone());

	// The first session is a plain connect, not a restoration.
	let mut restoring = false;

	loop {
		let end = run_session(
			&mut connection,
			&config,
			&callbacks,
			&mut rx,
			&mut state,
			restoring,
		)
		.await;
		if let SessionEnd::Shutdown = end {
			break;
		}

		state.clear_pending();
		set_status(&callbacks, ReconnectionStatus::Reconnecting);

		connection = match reconnect(&host, port, &mut holdoff, &mut rx, &mut state).await {
			Some(connection) => connection,
			None => break,
		};
		holdoff.reset();
		restoring = true;
	}

	tracing::debug!("client task finished");
}

/// Retry loop with hold-off backoff. Returns `None` on shutdown. Commands
/// arriving while disconnected only adjust the desired subscription state;
/// it is restored on the wire once the diff is applied.
async fn reconnect(
	host: &str,
	port: u16,
	holdoff: &mut HoldOff,
	rx: &mut mpsc::UnboundedReceiver<Command>,
	state: &mut ClientState,
) -> Option<Connection> {
	loop {
		let deadline = Instant::now() + holdoff.advance();
		loop {
			tokio::select! {
				_ = time::sleep_until(deadline) => break,
				command = rx.recv() => match command {
					Some(Command::Subscribe { global_id }) => state.set_subscribed(&global_id, true),
					Some(Command::Unsubscribe { global_id }) => state.set_subscribed(&global_id, false),
					Some(Command::SendConfigRequest { .. }) => {
						tracing::debug!("dropping config request while disconnected");
					}
					Some(Command::Shutdown) | None => return None,
				},
			}
		}

		match TcpStream::connect((host, port)).await {
			Ok(socket) => return Some(Connection::new(socket)),
			Err(error) => tracing::debug!(%error, "reconnect attempt failed"),
		}
	}
}

async fn run_session(
	connection: &mut Connection,
	config: &TransportConfig,
	callbacks: &ClientCallbacks,
	rx: &mut mpsc::UnboundedReceiver<Command>,
	state: &mut ClientState,
	mut restoring: bool,
) -> SessionEnd {
	let mut heartbeat = time::interval(config.heartbeat_period);
	// Discard the first tick from the heartbeat interval.
	let _ = heartbeat.tick().await;

	let liveness = config.heartbeat_period * config.missed_heartbeats;
	let mut deadline = Instant::now() + liveness;

	loop {
		tokio::select! {
			command = rx.recv() => {
				let packet = match command {
					Some(Command::Subscribe { global_id }) => state.subscribe(&global_id),
					Some(Command::Unsubscribe { global_id }) => state.unsubscribe(&global_id),
					Some(Command::SendConfigRequest { payload }) => Some(Packet::ConfigBlob { payload }),
					Some(Command::Shutdown) | None => return SessionEnd::Shutdown,
				};
				if let Some(packet) = packet {
					if connection.write_packet(&packet).await.is_err() {
						return SessionEnd::Failed;
					}
				}
			}
			result = connection.read_packet() => {
				let packet = match result {
					Ok(Some(packet)) => packet,
					Ok(None) => {
						tracing::debug!("server closed the connection");
						return SessionEnd::Failed;
					}
					Err(error) => {
						tracing::debug!(%error, "transport failed");
						return SessionEnd::Failed;
					}
				};
				deadline = Instant::now() + liveness;

				match packet {
					Packet::StateRestore { signals } => {
						let diff = state.apply_state_restore(&signals);
						for global_id in &diff.removed {
							if let Some(callback) = &callbacks.signal_unavailable {
								callback(global_id);
							}
						}
						for (global_id, serialized) in &diff.added {
							if let Some(callback) = &callbacks.signal_available {
								callback(global_id, serialized);
							}
						}
						for global_id in &diff.resubscribe {
							if let Some(packet) = state.subscribe(global_id) {
								if connection.write_packet(&packet).await.is_err() {
									return SessionEnd::Failed;
								}
							}
						}
						if restoring {
							restoring = false;
							set_status(callbacks, ReconnectionStatus::Restored);
							set_status(callbacks, ReconnectionStatus::Connected);
						}
					}
					Packet::SignalAvailable { global_id, serialized_signal } => {
						if state.signal_available(&global_id, &serialized_signal) {
							if let Some(callback) = &callbacks.signal_available {
								callback(&global_id, &serialized_signal);
							}
						}
					}
					Packet::SignalUnavailable { global_id } => {
						if state.signal_unavailable(&global_id) {
							if let Some(callback) = &callbacks.signal_unavailable {
								callback(&global_id);
							}
						}
					}
					Packet::SubscribeAck { global_id, request_id, ok } => {
						if state.resolve(request_id).is_some() {
							if !ok {
								tracing::warn!(%global_id, "subscribe rejected by server");
							}
							state.set_subscribed(&global_id, ok);
							if let Some(callback) = &callbacks.signal_subscription_ack {
								callback(&global_id, ok);
							}
						} else {
							tracing::warn!(request_id, "unsolicited subscribe ack");
						}
					}
					Packet::UnsubscribeAck { global_id, request_id, .. } => {
						if state.resolve(request_id).is_some() {
							state.set_subscribed(&global_id, false);
							if let Some(callback) = &callbacks.signal_subscription_ack {
								callback(&global_id, false);
							}
						} else {
							tracing::warn!(request_id, "unsolicited unsubscribe ack");
						}
					}
					Packet::SignalPacket { global_id, packet } => {
						if let Some(callback) = &callbacks.packet {
							callback(&global_id, packet);
						}
					}
					Packet::ConfigBlob { payload } => {
						if let Some(callback) = &callbacks.config_packet {
							callback(payload);
						}
					}
					Packet::Heartbeat => {}
					other => {
						tracing::warn!(
							packet_type = ?other.packet_type(),
							"unexpected packet from server"
						);
					}
				}
			}
			_ = heartbeat.tick() => {
				if connection.write_packet(&Packet::Heartbeat).await.is_err() {
					return SessionEnd::Failed;
				}
			}
			_ = time::sleep_until(deadline) => {
				tracing::warn!("missed heartbeats, treating server as dead");
				return SessionEnd::Failed;
			}
		}
	}
}

fn set_status(callbacks: &ClientCallbacks, status: ReconnectionStatus) {
	tracing::info!(?status, "reconnection status changed");
	if let Some(callback) = &callbacks.reconnection_status_changed {
		callback(status);
	}
}
