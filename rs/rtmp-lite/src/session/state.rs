use std::fmt;

use parking_lot::Mutex;
use tokio::sync::watch;

/// The externally observable lifecycle, reported in this order until Publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
	Uninitialized,
	TransportConnecting,
	Handshake0Sent,
	Handshake1Sent,
	HandshakeComplete,
	ConnectSent,
	ReleaseStreamSent,
	FcPublishSent,
	CreateStreamSent,
	PublishSent,
	Publishing,
	Error,
	Closed,
}

impl SessionState {
	/// No further transitions happen.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Error | Self::Closed)
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Callback invoked on every state transition, from the network worker.
pub type StateCallback = Box<dyn FnMut(SessionState) + Send>;

/// Publishes state changes to the watch channel and the user callback.
pub(crate) struct StateSink {
	tx: watch::Sender<SessionState>,
	callback: Mutex<Option<StateCallback>>,
}

impl StateSink {
	pub fn new(callback: Option<StateCallback>) -> Self {
		Self {
			tx: watch::Sender::new(SessionState::Uninitialized),
			callback: Mutex::new(callback),
		}
	}

	pub fn subscribe(&self) -> watch::Receiver<SessionState> {
		self.tx.subscribe()
	}

	pub fn get(&self) -> SessionState {
		*self.tx.borrow()
	}

	/// Transition, unless already terminal or unchanged. Returns true on a transition.
	pub fn set(&self, state: SessionState) -> bool {
		let mut changed = false;
		self.tx.send_if_modified(|current| {
			if current.is_terminal() || *current == state {
				return false;
			}

			tracing::debug!(from = %current, to = %state, "session state");
			*current = state;
			changed = true;
			true
		});

		if changed {
			if let Some(callback) = self.callback.lock().as_mut() {
				callback(state);
			}
		}

		changed
	}
}
