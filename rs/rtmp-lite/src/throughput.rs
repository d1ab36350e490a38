use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::watch;

/// Samples used for the bandwidth average, newest weighted highest.
pub const BANDWIDTH_WINDOW: usize = 5;

/// Consecutive growing queue averages that indicate congestion.
pub const TURNDOWN_WINDOW: usize = 3;

// Each older bandwidth sample counts half as much as the next.
const DECAY: f64 = 0.5;

// Empty intervals before the vector reaches its maximum.
const HEADROOM_INTERVALS: u32 = 10;

/// One estimate, delivered every sampling interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
	/// Bytes per second handed to the transport, weighted toward recent intervals.
	pub bandwidth: f64,

	/// Negative when congestion builds, positive when there is sustained headroom.
	pub vector: f64,

	/// The queue has grown for several consecutive intervals.
	pub turndown: bool,
}

/// The pure estimation state; one [Estimator::update] per interval.
#[derive(Debug, Default)]
pub struct Estimator {
	bandwidth: VecDeque<f64>,
	queued: VecDeque<f64>,
	empty: u32,
}

impl Estimator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fold one interval's samples into the estimate.
	pub fn update(&mut self, sent: &[usize], queued: &[usize], interval: Duration) -> Throughput {
		let secs = interval.as_secs_f64().max(0.001);
		let sent: usize = sent.iter().sum();

		self.bandwidth.push_front(sent as f64 / secs);
		self.bandwidth.truncate(BANDWIDTH_WINDOW);

		let mut weight = 1.0;
		let mut total = 0.0;
		let mut weights = 0.0;
		for sample in &self.bandwidth {
			total += sample * weight;
			weights += weight;
			weight *= DECAY;
		}
		let bandwidth = total / weights;

		// No samples means nothing was submitted or sent; carry the last level forward.
		let average = match queued.is_empty() {
			true => self.queued.front().copied().unwrap_or(0.0),
			false => queued.iter().sum::<usize>() as f64 / queued.len() as f64,
		};

		self.queued.push_front(average);
		self.queued.truncate(TURNDOWN_WINDOW);

		let turndown = self.queued.len() == TURNDOWN_WINDOW
			&& average > 0.0
			&& self.queued.iter().zip(self.queued.iter().skip(1)).all(|(newer, older)| newer > older);

		let vector = if turndown {
			// Queue growth relative to what is draining per second.
			let oldest = self.queued.back().copied().unwrap_or(0.0);
			let growth = (average - oldest) / ((TURNDOWN_WINDOW - 1) as f64 * secs);
			-(growth / bandwidth.max(1.0)).clamp(0.1, 1.0)
		} else if average == 0.0 {
			self.empty = (self.empty + 1).min(HEADROOM_INTERVALS);
			self.empty as f64 / HEADROOM_INTERVALS as f64
		} else {
			0.0
		};

		if average > 0.0 {
			self.empty = 0;
		}

		Throughput {
			bandwidth,
			vector,
			turndown,
		}
	}
}

type Callback = Arc<dyn Fn(Throughput) + Send + Sync>;

#[derive(Default)]
struct Inner {
	// Written by different tasks, so each has its own lock.
	sent: Mutex<Vec<usize>>,
	queued: Mutex<Vec<usize>>,

	callback: Mutex<Option<Callback>>,
	latest: Mutex<Option<Throughput>>,
}

/// Collects samples from the network worker and producers, and runs the periodic estimate.
#[derive(Clone, Default)]
pub struct ThroughputMonitor {
	inner: Arc<Inner>,
}

impl ThroughputMonitor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Bytes handed to the transport.
	pub fn record_sent(&self, bytes: usize) {
		self.inner.sent.lock().push(bytes);
	}

	/// Bytes waiting in the outbound queue.
	pub fn record_queued(&self, bytes: usize) {
		self.inner.queued.lock().push(bytes);
	}

	/// Replace the callback invoked with every estimate.
	pub fn set_callback(&self, callback: impl Fn(Throughput) + Send + Sync + 'static) {
		*self.inner.callback.lock() = Some(Arc::new(callback));
	}

	pub fn latest(&self) -> Option<Throughput> {
		*self.inner.latest.lock()
	}

	/// Take the samples collected since the previous tick and produce an estimate.
	pub fn tick(&self, estimator: &mut Estimator, elapsed: Duration) -> Throughput {
		let sent = std::mem::take(&mut *self.inner.sent.lock());
		let queued = std::mem::take(&mut *self.inner.queued.lock());

		let throughput = estimator.update(&sent, &queued, elapsed);
		*self.inner.latest.lock() = Some(throughput);

		// Don't hold the lock while calling out.
		let callback = self.inner.callback.lock().clone();
		if let Some(callback) = callback {
			callback(throughput);
		}

		throughput
	}

	/// Estimate every `interval` until `closing` becomes true or its sender is dropped.
	pub async fn run(
		self,
		interval: Duration,
		mut closing: watch::Receiver<bool>,
		mut on_estimate: impl FnMut(Throughput) + Send,
	) {
		let mut estimator = Estimator::new();
		let mut ticker = tokio::time::interval(interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		// The first tick completes immediately.
		let mut last = ticker.tick().await;

		loop {
			tokio::select! {
				now = ticker.tick() => {
					let throughput = self.tick(&mut estimator, now - last);
					last = now;

					tracing::trace!(bandwidth = throughput.bandwidth, vector = throughput.vector, turndown = throughput.turndown, "throughput");
					on_estimate(throughput);
				}
				res = closing.wait_for(|closing| *closing) => {
					if res.is_err() {
						tracing::trace!("throughput monitor orphaned");
					}
					return;
				}
			}
		}
	}
}
