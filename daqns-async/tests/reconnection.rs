mod common;

use common::*;
use daqns_async::ReconnectionStatus;
use daqns_core::{PacketKind, StreamPacket};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_loss_reports_reconnecting_then_restored() {
	init_tracing();

	let server = start_server(Vec::new()).await;
	let port = server.port;

	let mut clients = Vec::new();
	for _ in 0..4 {
		clients.push(TestClient::connect(port).await);
	}

	server.handler.stop_server().await;
	for client in &mut clients {
		assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Reconnecting);
	}

	let restarted = start_server_on(Vec::new(), port).await;
	for client in &mut clients {
		assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Restored);
		assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Connected);
	}

	restarted.handler.stop_server().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restoration_diffs_the_mirror_and_resubscribes() {
	init_tracing();

	let kept = float_signal("/root/dev0/kept");
	let dropped = bare_signal("/root/dev0/dropped");

	let mut server = start_server(vec![kept.clone(), dropped.clone()]).await;
	let port = server.port;

	let mut client = TestClient::connect(port).await;
	// Initial event for the kept signal, sent on accept.
	let (event_id, packet) = recv(&mut client.packets).await;
	assert_eq!(event_id, kept.global_id());
	assert_event(&packet);

	assert_eq!(recv(&mut client.available).await.0, kept.global_id());
	assert_eq!(recv(&mut client.available).await.0, dropped.global_id());

	client.handler.subscribe_signal(kept.global_id()).unwrap();
	assert_eq!(
		recv(&mut client.acks).await,
		(kept.global_id().to_owned(), true)
	);
	assert_eq!(recv(&mut server.subscribed).await, kept.global_id());
	// The replayed initial event for the fresh subscription.
	assert_event(&recv(&mut client.packets).await.1);

	server.handler.stop_server().await;
	assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Reconnecting);

	// Restart with one signal kept, one gone, one new.
	let fresh = bare_signal("/root/dev0/fresh");
	let mut restarted = start_server_on(vec![kept.clone(), fresh.clone()], port).await;

	assert_eq!(recv(&mut client.unavailable).await, dropped.global_id());
	let (added_id, _) = recv(&mut client.available).await;
	assert_eq!(added_id, fresh.global_id());

	assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Restored);
	assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Connected);

	// The previously subscribed signal is re-subscribed on the wire.
	assert_eq!(recv(&mut restarted.subscribed).await, kept.global_id());
	assert_eq!(
		recv(&mut client.acks).await,
		(kept.global_id().to_owned(), true)
	);

	// The first packet after restoration is the fresh initial event, only
	// then does data flow again.
	let (restored_id, first) = recv(&mut client.packets).await;
	assert_eq!(restored_id, kept.global_id());
	assert_event(&first);

	restarted
		.handler
		.send_packet(&kept, StreamPacket::data(vec![42u8]));
	loop {
		let (_, packet) = recv(&mut client.packets).await;
		match packet.kind {
			// The subscribe replay may arrive before the data packet.
			PacketKind::Event => continue,
			PacketKind::Data => {
				assert_eq!(packet.payload.as_ref(), &[42]);
				break;
			}
		}
	}

	restarted.handler.stop_server().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restoring_identical_state_is_callback_silent() {
	init_tracing();

	let signal = bare_signal("/root/dev0/signal");
	let mut server = start_server(vec![signal.clone()]).await;
	let port = server.port;

	let mut client = TestClient::connect(port).await;
	assert_eq!(recv(&mut client.available).await.0, signal.global_id());

	client.handler.subscribe_signal(signal.global_id()).unwrap();
	assert_eq!(recv(&mut server.subscribed).await, signal.global_id());
	assert_eq!(
		recv(&mut client.acks).await,
		(signal.global_id().to_owned(), true)
	);

	server.handler.stop_server().await;
	assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Reconnecting);

	let mut restarted = start_server_on(vec![signal.clone()], port).await;
	assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Restored);
	assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Connected);

	// Identical advertised set: the mirror is retained, so neither
	// available nor unavailable fires, but the subscription is restored.
	silent(&mut client.available, Duration::from_millis(100)).await;
	silent(&mut client.unavailable, Duration::from_millis(100)).await;
	assert_eq!(recv(&mut restarted.subscribed).await, signal.global_id());

	restarted.handler.stop_server().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscriptions_made_while_disconnected_are_restored() {
	init_tracing();

	let signal = bare_signal("/root/dev0/signal");
	let server = start_server(vec![signal.clone()]).await;
	let port = server.port;

	let mut client = TestClient::connect(port).await;
	assert_eq!(recv(&mut client.available).await.0, signal.global_id());

	server.handler.stop_server().await;
	assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Reconnecting);

	// Subscribing while disconnected only records intent; the wire request
	// goes out during restoration.
	client.handler.subscribe_signal(signal.global_id()).unwrap();

	let mut restarted = start_server_on(vec![signal.clone()], port).await;
	assert_eq!(recv(&mut client.status).await, ReconnectionStatus::Restored);
	assert_eq!(recv(&mut restarted.subscribed).await, signal.global_id());
	assert_eq!(
		recv(&mut client.acks).await,
		(signal.global_id().to_owned(), true)
	);

	restarted.handler.stop_server().await;
}
