use super::handler::ServerHandler;
use crate::signal::{PacketReader, StreamedSignal};
use std::{
	io,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
	thread,
	time::Duration,
};

/// Dedicated thread that drains subscribed signals' packet queues into the
/// server handler for fan-out.
///
/// The readers vector holds one entry per signal with a positive
/// subscription counter; the subscribe/unsubscribe hooks drive membership
/// through a [`PumpHandle`]. One mutex guards the vector for both the drain
/// pass and membership changes, and `send_packet` only enqueues, so the lock
/// is never held across I/O.
pub struct PacketPump {
	shared: Arc<PumpShared>,
	tick: Duration,
	thread: Option<thread::JoinHandle<()>>,
}

struct PumpShared {
	readers: Mutex<Vec<(Arc<StreamedSignal>, PacketReader)>>,
	active: AtomicBool,
}

/// Membership handle: adds and removes signal readers.
#[derive(Clone)]
pub struct PumpHandle {
	shared: Arc<PumpShared>,
}

impl PumpHandle {
	/// Idempotent per signal.
	pub fn add_reader(&self, signal: &Arc<StreamedSignal>) {
		let mut readers = self.shared.readers.lock().unwrap();
		if readers.iter().any(|(known, _)| Arc::ptr_eq(known, signal)) {
			return;
		}
		tracing::info!(global_id = signal.global_id(), "reader added");
		readers.push((signal.clone(), PacketReader::new(signal.clone())));
	}

	pub fn remove_reader(&self, signal: &Arc<StreamedSignal>) {
		let mut readers = self.shared.readers.lock().unwrap();
		let before = readers.len();
		readers.retain(|(known, _)| !Arc::ptr_eq(known, signal));
		if readers.len() != before {
			tracing::info!(global_id = signal.global_id(), "reader removed");
		}
	}
}

impl PacketPump {
	pub fn new(tick: Duration) -> Self {
		Self {
			shared: Arc::new(PumpShared {
				readers: Mutex::new(Vec::new()),
				active: AtomicBool::new(false),
			}),
			tick,
			thread: None,
		}
	}

	pub fn handle(&self) -> PumpHandle {
		PumpHandle {
			shared: self.shared.clone(),
		}
	}

	pub fn start(&mut self, handler: ServerHandler) -> io::Result<()> {
		if self.thread.is_some() {
			return Ok(());
		}

		self.shared.active.store(true, Ordering::SeqCst);
		let shared = self.shared.clone();
		let tick = self.tick;
		let thread = thread::Builder::new()
			.name("daqns-packet-pump".into())
			.spawn(move || pump_loop(&shared, &handler, tick))?;
		self.thread = Some(thread);
		Ok(())
	}

	/// Flips the shutdown flag and joins the thread. Idempotent.
	pub fn stop(&mut self) {
		self.shared.active.store(false, Ordering::SeqCst);
		if let Some(thread) = self.thread.take() {
			let _ = thread.join();
		}
		self.shared.readers.lock().unwrap().clear();
	}
}

impl Drop for PacketPump {
	fn drop(&mut self) {
		self.stop();
	}
}

fn pump_loop(shared: &PumpShared, handler: &ServerHandler, tick: Duration) {
	while shared.active.load(Ordering::SeqCst) {
		{
			let readers = shared.readers.lock().unwrap();
			for (signal, reader) in readers.iter() {
				while let Some(packet) = reader.read() {
					handler.send_packet(signal, packet);
				}
			}
		}
		thread::sleep(tick);
	}
	tracing::debug!("packet pump finished");
}
