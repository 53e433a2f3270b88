mod holdoff;
mod state;
mod task;

use crate::connection::Connection;
use bytes::Bytes;
use daqns_core::{DeviceUrl, InvalidDeviceUrl, StreamPacket};
use std::{io, ops::Range, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};

/// Client-observed reconnection state.
///
/// `Reconnecting` is entered as soon as the socket fails or heartbeats stop;
/// `Restored` is reported once the announcement diff has been applied, after
/// which the state settles back to `Connected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectionStatus {
	Connected,
	Reconnecting,
	Restored,
}

pub type OnSignalAvailable = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type OnSignalUnavailable = Arc<dyn Fn(&str) + Send + Sync>;
pub type OnPacket = Arc<dyn Fn(&str, StreamPacket) + Send + Sync>;
pub type OnSignalSubscriptionAck = Arc<dyn Fn(&str, bool) + Send + Sync>;
pub type OnReconnectionStatusChanged = Arc<dyn Fn(ReconnectionStatus) + Send + Sync>;
pub type OnConfigPacket = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Callbacks surfaced to the device layer. Unset callbacks are ignored.
#[derive(Clone, Default)]
pub struct ClientCallbacks {
	pub signal_available: Option<OnSignalAvailable>,
	pub signal_unavailable: Option<OnSignalUnavailable>,
	pub packet: Option<OnPacket>,
	pub signal_subscription_ack: Option<OnSignalSubscriptionAck>,
	pub reconnection_status_changed: Option<OnReconnectionStatusChanged>,
	pub config_packet: Option<OnConfigPacket>,
}

/// Transport-layer tuning for one client connection.
#[derive(Clone, Debug)]
pub struct TransportConfig {
	pub heartbeat_period: Duration,

	/// Consecutive silent heartbeat periods before the peer is presumed dead.
	pub missed_heartbeats: u32,

	/// Reconnect backoff bounds: first retry after the lower bound, doubling
	/// up to the upper bound. Retries continue until shutdown.
	pub reconnect_holdoff: Range<Duration>,
}

impl Default for TransportConfig {
	fn default() -> Self {
		Self {
			heartbeat_period: Duration::from_secs(1),
			missed_heartbeats: 3,
			reconnect_holdoff: Duration::from_millis(100)..Duration::from_secs(2),
		}
	}
}

#[derive(Debug)]
pub(crate) enum Command {
	Subscribe { global_id: String },
	Unsubscribe { global_id: String },
	SendConfigRequest { payload: Bytes },
	Shutdown,
}

#[derive(Debug, Error)]
pub enum ConnectError {
	#[error("client is already connected")]
	AlreadyConnected,
	#[error("invalid connection string: {0}")]
	InvalidUrl(#[from] InvalidDeviceUrl),
	#[error(transparent)]
	Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("client is not connected")]
	NotConnected,
}

/// Client side of the native streaming protocol: maintains a mirror of the
/// server-announced signals, receives packets, and reconnects after drops.
pub struct ClientHandler {
	config: TransportConfig,
	callbacks: Option<ClientCallbacks>,
	channel: Option<mpsc::UnboundedSender<Command>>,
	task: Option<JoinHandle<()>>,
}

impl ClientHandler {
	pub fn new(config: TransportConfig, callbacks: ClientCallbacks) -> Self {
		Self {
			config,
			callbacks: Some(callbacks),
			channel: None,
			task: None,
		}
	}

	/// Attempts one TCP connection to the server.
	///
	/// On success the client task is running and control frames flow; the
	/// server's announcements arrive through the callbacks. On failure no
	/// state changes and no callbacks fire; the caller owns any retry.
	#[tracing::instrument(skip(self), err)]
	pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), ConnectError> {
		if self.channel.is_some() {
			return Err(ConnectError::AlreadyConnected);
		}
		let callbacks = self.callbacks.take().ok_or(ConnectError::AlreadyConnected)?;

		let socket = match TcpStream::connect((host, port)).await {
			Ok(socket) => socket,
			Err(error) => {
				self.callbacks = Some(callbacks);
				return Err(error.into());
			}
		};

		let (tx, rx) = mpsc::unbounded_channel();
		let task = tokio::spawn(task::client_task(
			Connection::new(socket),
			host.to_owned(),
			port,
			self.config.clone(),
			callbacks,
			rx,
		));

		self.channel = Some(tx);
		self.task = Some(task);
		Ok(())
	}

	/// Connects using a `daq.nsd://` connection string.
	pub async fn connect_url(&mut self, connection_string: &str) -> Result<(), ConnectError> {
		let url = DeviceUrl::parse(connection_string)?;
		self.connect(url.host(), url.port()).await
	}

	/// Requests a subscription; completion is observed through the
	/// subscription-ack callback. Repeated calls for the same id coalesce
	/// onto one wire request.
	pub fn subscribe_signal(&self, global_id: &str) -> Result<(), ClientError> {
		self.send(Command::Subscribe {
			global_id: global_id.to_owned(),
		})
	}

	pub fn unsubscribe_signal(&self, global_id: &str) -> Result<(), ClientError> {
		self.send(Command::Unsubscribe {
			global_id: global_id.to_owned(),
		})
	}

	/// Forwards an opaque configuration-protocol request to the server.
	pub fn send_config_request(&self, payload: Bytes) -> Result<(), ClientError> {
		self.send(Command::SendConfigRequest { payload })
	}

	/// Sends shutdown and waits for the client task to finish. Pending
	/// subscribe/unsubscribe requests are dropped with a disconnected
	/// failure.
	pub async fn disconnect(mut self) {
		if let Some(channel) = self.channel.take() {
			let _ = channel.send(Command::Shutdown);
		}
		if let Some(task) = self.task.take() {
			let _ = task.await;
		}
	}

	fn send(&self, command: Command) -> Result<(), ClientError> {
		let channel = self.channel.as_ref().ok_or(ClientError::NotConnected)?;
		channel.send(command).map_err(|_| ClientError::NotConnected)
	}
}

impl Drop for ClientHandler {
	fn drop(&mut self) {
		if let Some(channel) = &self.channel {
			let _ = channel.send(Command::Shutdown);
		}
	}
}

pub(crate) use self::{holdoff::HoldOff, state::ClientState};
