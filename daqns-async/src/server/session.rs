use super::{
	handler::{ConfigRequestHandler, SessionId, Shared},
	ServerConfig,
};
use crate::connection::{Connection, TransportError};
use daqns_core::Packet;
use std::sync::Weak;
use tokio::{
	sync::{mpsc, watch},
	time::{self, Instant},
};

/// One accepted connection: drains the session's outbound queue into the
/// socket and dispatches inbound control frames. Holds only a weak
/// back-reference to the handler so a dropped server tears sessions down
/// rather than the other way around.
#[tracing::instrument(skip_all, fields(session_id = session_id))]
pub(crate) async fn session_task(
	shared: Weak<Shared>,
	session_id: SessionId,
	mut connection: Connection,
	outbound: mpsc::Receiver<Packet>,
	config_handler: Option<ConfigRequestHandler>,
	shutdown: watch::Receiver<bool>,
	config: ServerConfig,
) {
	let result = run(
		&shared,
		session_id,
		&mut connection,
		outbound,
		config_handler,
		shutdown,
		&config,
	)
	.await;

	if let Err(error) = result {
		tracing::debug!(%error, "session ended with error");
	}
	if let Some(shared) = shared.upgrade() {
		shared.unregister_session(session_id);
	}
}

async fn run(
	shared: &Weak<Shared>,
	session_id: SessionId,
	connection: &mut Connection,
	mut outbound: mpsc::Receiver<Packet>,
	mut config_handler: Option<ConfigRequestHandler>,
	mut shutdown: watch::Receiver<bool>,
	config: &ServerConfig,
) -> Result<(), TransportError> {
	let mut heartbeat = time::interval(config.heartbeat_period);
	// Discard the first tick from the heartbeat interval.
	let _ = heartbeat.tick().await;

	let liveness = config.heartbeat_period * config.missed_heartbeats;
	let mut deadline = Instant::now() + liveness;

	loop {
		tokio::select! {
			queued = outbound.recv() => match queued {
				Some(packet) => connection.write_packet(&packet).await?,
				// The registry entry is gone; nothing left to send.
				None => return Ok(()),
			},
			result = connection.read_packet() => {
				let Some(packet) = result? else {
					tracing::debug!("client closed the connection");
					return Ok(());
				};
				deadline = Instant::now() + liveness;

				let Some(shared) = shared.upgrade() else {
					return Ok(());
				};
				match packet {
					Packet::Subscribe { global_id, request_id } => {
						shared.handle_subscribe(session_id, &global_id, request_id);
					}
					Packet::Unsubscribe { global_id, request_id } => {
						shared.handle_unsubscribe(session_id, &global_id, request_id);
					}
					Packet::ConfigBlob { payload } => match &mut config_handler {
						Some(handler) => handler(payload),
						None => tracing::debug!("config packet ignored, no config server installed"),
					},
					Packet::Heartbeat => {}
					other => {
						tracing::warn!(
							packet_type = ?other.packet_type(),
							"unexpected packet from client"
						);
					}
				}
			}
			_ = heartbeat.tick() => {
				connection.write_packet(&Packet::Heartbeat).await?;
			}
			_ = time::sleep_until(deadline) => {
				return Err(TransportError::HeartbeatTimeout);
			}
			changed = shutdown.changed() => {
				if changed.is_err() || *shutdown.borrow() {
					return Ok(());
				}
			}
		}
	}
}
