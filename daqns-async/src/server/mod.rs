mod events;
mod handler;
mod pump;
mod session;

pub use events::{spawn_component_event_adapter, Component, CoreEvent};
pub use handler::{
	ConfigPacketSender, ConfigRequestHandler, OnSignalSubscribed, OnSignalUnsubscribed,
	ServerError, ServerHandler, ServerHooks, SessionInfo, SetUpConfigProtocolServer,
};
pub use pump::{PacketPump, PumpHandle};

use crate::signal::StreamedSignal;
use daqns_core::STREAMING_PROTOCOL_ID;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Clone, Debug)]
pub struct ServerConfig {
	/// Bound on each session's outbound queue; frames beyond it are dropped.
	pub session_queue_capacity: usize,

	pub heartbeat_period: Duration,

	/// Consecutive silent heartbeat periods before a session is presumed dead.
	pub missed_heartbeats: u32,

	/// Sleep between packet pump drain passes.
	pub pump_tick: Duration,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			session_queue_capacity: 256,
			heartbeat_period: Duration::from_secs(1),
			missed_heartbeats: 3,
			pump_tick: Duration::from_millis(20),
		}
	}
}

/// Server-published advertisement for discovery layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamingAdvertisement {
	pub protocol_id: &'static str,
	pub port: u16,
}

/// The full server-side protocol stack: the handler plus the packet pump and
/// the component-event adapter, wired the way a device server runs them. The
/// subscription hooks drive pump membership, so a signal's queue is only
/// drained while someone is subscribed.
pub struct StreamingServer {
	handler: ServerHandler,
	pump: PacketPump,
	adapter: Option<JoinHandle<()>>,
	port: Option<u16>,
}

impl StreamingServer {
	pub fn new(
		config: ServerConfig,
		initial_signals: Vec<Arc<StreamedSignal>>,
		user_hooks: ServerHooks,
	) -> Self {
		let pump = PacketPump::new(config.pump_tick);

		let hooks = ServerHooks {
			on_signal_subscribed: Some({
				let pump = pump.handle();
				let user = user_hooks.on_signal_subscribed;
				Arc::new(move |signal| {
					pump.add_reader(signal);
					if let Some(hook) = &user {
						hook(signal);
					}
				})
			}),
			on_signal_unsubscribed: Some({
				let pump = pump.handle();
				let user = user_hooks.on_signal_unsubscribed;
				Arc::new(move |signal| {
					pump.remove_reader(signal);
					if let Some(hook) = &user {
						hook(signal);
					}
				})
			}),
			set_up_config_protocol_server: user_hooks.set_up_config_protocol_server,
		};

		Self {
			handler: ServerHandler::new(config, initial_signals, hooks),
			pump,
			adapter: None,
			port: None,
		}
	}

	pub async fn start(&mut self, port: u16) -> Result<u16, ServerError> {
		let port = self.handler.start_server(port).await?;
		self.pump.start(self.handler.clone())?;
		self.port = Some(port);
		Ok(port)
	}

	/// Subscribes the server to a root device's core-event stream.
	pub fn watch_component_events(
		&mut self,
		root_global_id: impl Into<String>,
		events: mpsc::Receiver<CoreEvent>,
	) {
		self.adapter = Some(spawn_component_event_adapter(
			self.handler.clone(),
			root_global_id.into(),
			events,
		));
	}

	/// What a discovery layer would publish for this server, once started.
	pub fn advertisement(&self) -> Option<StreamingAdvertisement> {
		self.port.map(|port| StreamingAdvertisement {
			protocol_id: STREAMING_PROTOCOL_ID,
			port,
		})
	}

	pub fn handler(&self) -> &ServerHandler {
		&self.handler
	}

	/// Stops the adapter, the pump and the handler, in that order. The pump
	/// thread is joined before any session or signal state is torn down.
	pub async fn stop(&mut self) {
		if let Some(adapter) = self.adapter.take() {
			adapter.abort();
		}
		self.pump.stop();
		self.handler.stop_server().await;
		self.port = None;
	}
}
