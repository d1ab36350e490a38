use std::{
	collections::VecDeque,
	sync::Arc,
	time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::model::PacketMetadata;

/// A payload waiting to be chunked and sent.
#[derive(Debug, Clone)]
pub struct Packet {
	pub payload: Bytes,
	pub metadata: PacketMetadata,
	pub queued: Instant,
}

/// Packets and bytes dropped by a single submission.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dropped {
	pub packets: u64,
	pub bytes: u64,
}

impl Dropped {
	pub fn is_empty(&self) -> bool {
		self.packets == 0
	}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
	pub queued_packets: usize,
	pub queued_bytes: usize,
	pub budget: usize,
	pub dropped_packets: u64,
	pub dropped_bytes: u64,
}

#[derive(Debug)]
struct State {
	packets: VecDeque<Packet>,
	bytes: usize,
	budget: usize,
	dropped_packets: u64,
	dropped_bytes: u64,
	last_keyframe_sent: Option<Instant>,
	closed: bool,
}

impl State {
	// The oldest non-keyframe, or failing that the oldest keyframe that isn't the newest one.
	fn victim(&self) -> Option<usize> {
		if let Some(index) = self.packets.iter().position(|p| !p.metadata.keyframe) {
			return Some(index);
		}

		let newest = self.packets.iter().rposition(|p| p.metadata.keyframe)?;
		self.packets
			.iter()
			.position(|p| p.metadata.keyframe)
			.filter(|&oldest| oldest != newest)
	}

	fn enforce(&mut self) -> Dropped {
		let mut dropped = Dropped::default();

		// A lone keyframe larger than the budget stays until the worker sends it.
		while self.bytes > self.budget {
			let Some(packet) = self.victim().and_then(|index| self.packets.remove(index)) else {
				break;
			};

			self.bytes -= packet.payload.len();
			dropped.packets += 1;
			dropped.bytes += packet.payload.len() as u64;
		}

		self.dropped_packets += dropped.packets;
		self.dropped_bytes += dropped.bytes;
		dropped
	}

	fn has_space(&self) -> bool {
		self.bytes < self.budget
	}
}

struct Inner {
	state: Mutex<State>,
	space: Condvar,
	ready: Notify,
}

/// A byte-bounded FIFO between producers and the network worker.
///
/// Producers never block on submit; when the budget is exceeded the oldest droppable packets are discarded.
#[derive(Clone)]
pub struct OutboundQueue {
	inner: Arc<Inner>,
}

impl OutboundQueue {
	pub fn new(budget: usize) -> Self {
		let state = State {
			packets: VecDeque::new(),
			bytes: 0,
			budget,
			dropped_packets: 0,
			dropped_bytes: 0,
			last_keyframe_sent: None,
			closed: false,
		};

		Self {
			inner: Arc::new(Inner {
				state: Mutex::new(state),
				space: Condvar::new(),
				ready: Notify::new(),
			}),
		}
	}

	/// Enqueue a packet, returning what was dropped to stay within budget.
	///
	/// Returns [None] if the queue was closed.
	pub fn submit(&self, payload: Bytes, metadata: PacketMetadata) -> Option<Dropped> {
		let dropped = {
			let mut state = self.inner.state.lock();
			if state.closed {
				return None;
			}

			state.bytes += payload.len();
			state.packets.push_back(Packet {
				payload,
				metadata,
				queued: Instant::now(),
			});

			state.enforce()
		};

		self.inner.ready.notify_one();
		Some(dropped)
	}

	/// Take the oldest packet.
	pub fn pop(&self) -> Option<Packet> {
		let mut state = self.inner.state.lock();
		let packet = state.packets.pop_front()?;
		state.bytes -= packet.payload.len();

		if state.has_space() {
			self.inner.space.notify_all();
		}

		Some(packet)
	}

	/// Wait until a packet may have been submitted.
	///
	/// Wakeups are not lost if a submit races the call; this is cancel safe.
	pub async fn ready(&self) {
		self.inner.ready.notified().await
	}

	/// Change the byte budget, dropping packets immediately if it shrank.
	pub fn set_budget(&self, budget: usize) -> Dropped {
		let mut state = self.inner.state.lock();
		state.budget = budget;
		let dropped = state.enforce();

		if state.has_space() {
			self.inner.space.notify_all();
		}

		dropped
	}

	pub fn budget(&self) -> usize {
		self.inner.state.lock().budget
	}

	pub fn bytes(&self) -> usize {
		self.inner.state.lock().bytes
	}

	pub fn is_empty(&self) -> bool {
		self.inner.state.lock().packets.is_empty()
	}

	pub fn stats(&self) -> QueueStats {
		let state = self.inner.state.lock();
		QueueStats {
			queued_packets: state.packets.len(),
			queued_bytes: state.bytes,
			budget: state.budget,
			dropped_packets: state.dropped_packets,
			dropped_bytes: state.dropped_bytes,
		}
	}

	/// Block the calling thread until the queue is below its budget or the timeout elapses.
	///
	/// Returns true if there is space. Must not be called from an async context.
	pub fn wait_for_space(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut state = self.inner.state.lock();

		while !state.closed && !state.has_space() {
			if self.inner.space.wait_until(&mut state, deadline).timed_out() {
				break;
			}
		}

		!state.closed && state.has_space()
	}

	/// Record that a packet has been handed to the transport.
	pub fn mark_sent(&self, packet: &Packet) {
		if packet.metadata.is_video_keyframe() {
			self.inner.state.lock().last_keyframe_sent = Some(Instant::now());
		}
	}

	pub fn last_keyframe_sent(&self) -> Option<Instant> {
		self.inner.state.lock().last_keyframe_sent
	}

	/// Reject further submissions and wake any waiters. Queued packets may still be popped.
	pub fn close(&self) {
		self.inner.state.lock().closed = true;
		self.inner.space.notify_all();
		self.inner.ready.notify_one();
	}

	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}
}
