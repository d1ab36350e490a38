//! Byte accounting for a publishing session.
//!
//! Compare what the encoder produced against what reached the transport;
//! the difference is what the outbound queue shed under congestion.

use std::sync::atomic::{AtomicU64, Ordering};

/// A sink for session byte accounting, called from the network worker.
///
/// Implementations should be fast and non-blocking (e.g., atomics).
pub trait Stats: Send + Sync + 'static {
	/// Bytes read from the transport, handshake included.
	fn add_rx_bytes(&self, bytes: u64);

	/// Bytes written to the transport, chunk headers included.
	fn add_tx_bytes(&self, bytes: u64);

	/// Packets discarded by the outbound queue.
	fn add_dropped(&self, _packets: u64, _bytes: u64) {}
}

/// Default stats sink that does nothing.
#[derive(Default)]
pub struct NoopStats;

impl Stats for NoopStats {
	fn add_rx_bytes(&self, _bytes: u64) {}
	fn add_tx_bytes(&self, _bytes: u64) {}
}

/// Running totals, readable at any time with [Counters::snapshot].
#[derive(Default, Debug)]
pub struct Counters {
	rx_bytes: AtomicU64,
	tx_bytes: AtomicU64,
	dropped_packets: AtomicU64,
	dropped_bytes: AtomicU64,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
	pub rx_bytes: u64,
	pub tx_bytes: u64,
	pub dropped_packets: u64,
	pub dropped_bytes: u64,
}

impl Counters {
	pub fn snapshot(&self) -> CountersSnapshot {
		CountersSnapshot {
			rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
			tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
			dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
			dropped_bytes: self.dropped_bytes.load(Ordering::Relaxed),
		}
	}
}

impl Stats for Counters {
	fn add_rx_bytes(&self, bytes: u64) {
		self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
	}

	fn add_tx_bytes(&self, bytes: u64) {
		self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
	}

	fn add_dropped(&self, packets: u64, bytes: u64) {
		self.dropped_packets.fetch_add(packets, Ordering::Relaxed);
		self.dropped_bytes.fetch_add(bytes, Ordering::Relaxed);
	}
}
