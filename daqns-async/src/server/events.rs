use super::handler::ServerHandler;
use crate::signal::StreamedSignal;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};

/// Core events observed from the object tree. Only additions and removals
/// matter to the protocol; everything else is ignored.
#[derive(Clone)]
pub enum CoreEvent {
	ComponentAdded(Component),
	ComponentRemoved {
		parent_global_id: String,
		local_id: String,
	},
	AttributeChanged {
		global_id: String,
	},
}

#[derive(Clone)]
pub enum Component {
	Signal(Arc<StreamedSignal>),
	Folder {
		global_id: String,
		items: Vec<Component>,
	},
}

impl Component {
	fn global_id(&self) -> &str {
		match self {
			Self::Signal(signal) => signal.global_id(),
			Self::Folder { global_id, .. } => global_id,
		}
	}

	/// Depth-first enumeration of the signals under this component.
	fn collect_signals(&self, out: &mut Vec<Arc<StreamedSignal>>) {
		match self {
			Self::Signal(signal) => out.push(signal.clone()),
			Self::Folder { items, .. } => {
				for item in items {
					item.collect_signals(out);
				}
			}
		}
	}
}

/// Bridges component added/removed notifications into the server handler.
///
/// Only components whose global id begins with `root_global_id` are acted
/// upon, so multiple servers sharing a process do not leak signals into each
/// other's advertised sets.
pub fn spawn_component_event_adapter(
	handler: ServerHandler,
	root_global_id: String,
	mut events: mpsc::Receiver<CoreEvent>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(event) = events.recv().await {
			match event {
				CoreEvent::ComponentAdded(component) => {
					if !component.global_id().starts_with(&root_global_id) {
						continue;
					}
					tracing::info!(global_id = component.global_id(), "component added");

					let mut signals = Vec::new();
					component.collect_signals(&mut signals);
					for signal in signals {
						handler.add_signal(&signal);
					}
				}
				CoreEvent::ComponentRemoved {
					parent_global_id,
					local_id,
				} => {
					let removed_global_id = format!("{parent_global_id}/{local_id}");
					if !removed_global_id.starts_with(&root_global_id) {
						continue;
					}
					tracing::info!(global_id = %removed_global_id, "component removed");
					handler.remove_component_signals(&removed_global_id);
				}
				_ => {}
			}
		}
		tracing::debug!("component event stream closed");
	})
}
