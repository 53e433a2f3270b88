#![allow(dead_code)]

use bytes::Bytes;
use daqns_async::{
	ClientCallbacks, ClientHandler, ReconnectionStatus, ServerConfig, ServerHandler, ServerHooks,
	StreamedSignal, TransportConfig,
};
use daqns_core::{EventPacket, PacketKind, SignalDescriptor, StreamPacket};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::timeout};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
	use tracing_subscriber::EnvFilter;
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// A client handler with every callback wired to a channel, mirroring the
/// promise/future style of the protocol test suite.
pub struct TestClient {
	pub handler: ClientHandler,
	pub available: mpsc::UnboundedReceiver<(String, String)>,
	pub unavailable: mpsc::UnboundedReceiver<String>,
	pub packets: mpsc::UnboundedReceiver<(String, StreamPacket)>,
	pub acks: mpsc::UnboundedReceiver<(String, bool)>,
	pub status: mpsc::UnboundedReceiver<ReconnectionStatus>,
	pub config_packets: mpsc::UnboundedReceiver<Bytes>,
}

impl TestClient {
	pub fn new(config: TransportConfig) -> Self {
		let (available_tx, available) = mpsc::unbounded_channel();
		let (unavailable_tx, unavailable) = mpsc::unbounded_channel();
		let (packets_tx, packets) = mpsc::unbounded_channel();
		let (acks_tx, acks) = mpsc::unbounded_channel();
		let (status_tx, status) = mpsc::unbounded_channel();
		let (config_tx, config_packets) = mpsc::unbounded_channel();

		let callbacks = ClientCallbacks {
			signal_available: Some(Arc::new(move |global_id: &str, serialized: &str| {
				let _ = available_tx.send((global_id.to_owned(), serialized.to_owned()));
			})),
			signal_unavailable: Some(Arc::new(move |global_id: &str| {
				let _ = unavailable_tx.send(global_id.to_owned());
			})),
			packet: Some(Arc::new(move |global_id: &str, packet: StreamPacket| {
				let _ = packets_tx.send((global_id.to_owned(), packet));
			})),
			signal_subscription_ack: Some(Arc::new(move |global_id: &str, subscribed: bool| {
				let _ = acks_tx.send((global_id.to_owned(), subscribed));
			})),
			reconnection_status_changed: Some(Arc::new(move |changed| {
				let _ = status_tx.send(changed);
			})),
			config_packet: Some(Arc::new(move |payload: Bytes| {
				let _ = config_tx.send(payload);
			})),
		};

		Self {
			handler: ClientHandler::new(config, callbacks),
			available,
			unavailable,
			packets,
			acks,
			status,
			config_packets,
		}
	}

	pub async fn connect(port: u16) -> Self {
		let mut client = Self::new(fast_transport());
		client
			.handler
			.connect("127.0.0.1", port)
			.await
			.expect("client connect failed");
		client
	}
}

pub fn fast_transport() -> TransportConfig {
	TransportConfig {
		heartbeat_period: Duration::from_millis(200),
		missed_heartbeats: 3,
		reconnect_holdoff: Duration::from_millis(50)..Duration::from_millis(200),
	}
}

/// Server config with the same short heartbeat period the test clients use,
/// so neither side outlives the other's liveness deadline while idle.
pub fn fast_server_config() -> ServerConfig {
	ServerConfig {
		heartbeat_period: Duration::from_millis(200),
		..Default::default()
	}
}

pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
	timeout(TIMEOUT, rx.recv())
		.await
		.expect("timed out waiting for a callback")
		.expect("callback channel closed")
}

/// Asserts that nothing arrives on `rx` within `wait`.
pub async fn silent<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>, wait: Duration) {
	if let Ok(Some(unexpected)) = timeout(wait, rx.recv()).await {
		panic!("unexpected callback: {unexpected:?}");
	}
}

/// A signal with a known data descriptor, so the server caches an initial
/// event for it.
pub fn float_signal(global_id: &str) -> Arc<StreamedSignal> {
	StreamedSignal::new(
		SignalDescriptor::new(global_id)
			.with_name(global_id.rsplit('/').next().unwrap_or(global_id))
			.with_data_descriptor(json!({ "sampleType": "Float32" })),
	)
	.unwrap()
}

/// A signal with no data descriptor and therefore no initial event.
pub fn bare_signal(global_id: &str) -> Arc<StreamedSignal> {
	StreamedSignal::new(SignalDescriptor::new(global_id)).unwrap()
}

pub fn descriptor_changed() -> StreamPacket {
	EventPacket::data_descriptor_changed(json!({ "sampleType": "Binary" }))
		.to_stream_packet()
		.unwrap()
}

pub fn assert_event(packet: &StreamPacket) -> EventPacket {
	assert_eq!(packet.kind, PacketKind::Event, "expected an event packet");
	EventPacket::from_payload(&packet.payload).expect("malformed event payload")
}

pub struct TestServer {
	pub handler: ServerHandler,
	pub port: u16,
	pub subscribed: mpsc::UnboundedReceiver<String>,
	pub unsubscribed: mpsc::UnboundedReceiver<String>,
}

pub async fn start_server(signals: Vec<Arc<StreamedSignal>>) -> TestServer {
	start_server_on(signals, 0).await
}

pub async fn start_server_on(signals: Vec<Arc<StreamedSignal>>, port: u16) -> TestServer {
	let (subscribed_tx, subscribed) = mpsc::unbounded_channel();
	let (unsubscribed_tx, unsubscribed) = mpsc::unbounded_channel();

	let hooks = ServerHooks {
		on_signal_subscribed: Some(Arc::new(move |signal: &Arc<StreamedSignal>| {
			let _ = subscribed_tx.send(signal.global_id().to_owned());
		})),
		on_signal_unsubscribed: Some(Arc::new(move |signal: &Arc<StreamedSignal>| {
			let _ = unsubscribed_tx.send(signal.global_id().to_owned());
		})),
		set_up_config_protocol_server: None,
	};

	let handler = ServerHandler::new(fast_server_config(), signals, hooks);
	let port = handler.start_server(port).await.expect("server bind failed");

	TestServer {
		handler,
		port,
		subscribed,
		unsubscribed,
	}
}
