mod client;
mod connection;
mod server;
mod signal;

pub use client::{
	ClientCallbacks, ClientError, ClientHandler, ConnectError, OnConfigPacket, OnPacket,
	OnReconnectionStatusChanged, OnSignalAvailable, OnSignalSubscriptionAck, OnSignalUnavailable,
	ReconnectionStatus, TransportConfig,
};
pub use connection::TransportError;
pub use server::{
	spawn_component_event_adapter, Component, ConfigPacketSender, ConfigRequestHandler, CoreEvent,
	OnSignalSubscribed, OnSignalUnsubscribed, PacketPump, PumpHandle, ServerConfig, ServerError,
	ServerHandler, ServerHooks, SessionInfo, SetUpConfigProtocolServer, StreamingAdvertisement,
	StreamingServer,
};
pub use signal::{PacketReader, StreamedSignal};
