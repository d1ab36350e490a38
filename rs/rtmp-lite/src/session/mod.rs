mod state;
mod worker;

pub use state::*;

use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
	queue::{Dropped, OutboundQueue, QueueStats},
	throughput::{Throughput, ThroughputMonitor},
	transport::{Destination, Transport},
	Config, Error, NoopStats, PacketMetadata, Result, SessionParameters, Stats,
};

use worker::Shutdown;

/// State shared between the [Session] handle, the network worker and the throughput sampler.
pub(crate) struct Shared {
	pub config: Config,
	pub destination: Destination,

	pub queue: OutboundQueue,
	pub monitor: ThroughputMonitor,
	pub params: Mutex<Option<SessionParameters>>,
	pub stats: Arc<dyn Stats>,

	pub state: StateSink,
	pub error: Mutex<Option<Error>>,

	pub shutdown: watch::Sender<Shutdown>,
	pub sampling: watch::Sender<bool>,
}

impl Shared {
	fn record_dropped(&self, dropped: Dropped) {
		if dropped.is_empty() {
			return;
		}

		tracing::debug!(packets = dropped.packets, bytes = dropped.bytes, "dropped queued packets");
		self.stats.add_dropped(dropped.packets, dropped.bytes);
	}

	fn update_budget(&self, bandwidth: Option<f64>) {
		let params = *self.params.lock();
		let budget = self.config.budget(bandwidth, params.as_ref());
		let dropped = self.queue.set_budget(budget);
		self.record_dropped(dropped);
	}
}

/// A publishing session to a single destination.
///
/// The handshake, negotiation and all socket I/O run on a background task;
/// this handle submits media from any thread and observes the lifecycle.
/// Dropping the handle stops the session immediately.
pub struct Session {
	shared: Arc<Shared>,
	state: watch::Receiver<SessionState>,

	worker: Option<JoinHandle<()>>,
	sampler: Option<JoinHandle<()>>,
}

impl Session {
	/// Connect and start publishing in the background.
	///
	/// Must be called from within a tokio runtime.
	/// `on_state` is invoked from the network worker on every transition.
	pub fn connect<T: Transport>(
		transport: T,
		destination: Destination,
		config: Config,
		on_state: impl FnMut(SessionState) + Send + 'static,
	) -> Self {
		Self::connect_with_stats(transport, destination, config, on_state, Arc::new(NoopStats))
	}

	/// Like [Session::connect], with a sink for byte accounting.
	pub fn connect_with_stats<T: Transport>(
		transport: T,
		destination: Destination,
		config: Config,
		on_state: impl FnMut(SessionState) + Send + 'static,
		stats: Arc<dyn Stats>,
	) -> Self {
		let sample_interval = config.sample_interval;
		let queue = OutboundQueue::new(config.budget(None, None));

		let shared = Arc::new(Shared {
			config,
			destination,
			queue,
			monitor: ThroughputMonitor::new(),
			params: Mutex::new(None),
			stats,
			state: StateSink::new(Some(Box::new(on_state))),
			error: Mutex::new(None),
			shutdown: watch::Sender::new(Shutdown::Running),
			sampling: watch::Sender::new(false),
		});

		tracing::info!(destination = %shared.destination, "connecting");

		let state = shared.state.subscribe();

		let sampler = {
			let shared = shared.clone();
			let closing = shared.sampling.subscribe();
			let monitor = shared.monitor.clone();

			tokio::spawn(monitor.run(sample_interval, closing, move |throughput| {
				shared.update_budget(Some(throughput.bandwidth));
			}))
		};

		let worker = tokio::spawn(worker::run(transport, shared.clone()));

		Self {
			shared,
			state,
			worker: Some(worker),
			sampler: Some(sampler),
		}
	}

	/// Provide the stream properties announced in `onMetaData`.
	///
	/// Must be called before the server confirms publishing; the queue budget is recomputed.
	pub fn set_session_parameters(&self, params: SessionParameters) {
		*self.shared.params.lock() = Some(params);

		let bandwidth = self.shared.monitor.latest().map(|t| t.bandwidth);
		self.shared.update_budget(bandwidth);
	}

	/// Invoke `callback` with every throughput estimate.
	pub fn set_bandwidth_callback(&self, callback: impl Fn(Throughput) + Send + Sync + 'static) {
		self.shared.monitor.set_callback(callback);
	}

	/// Queue a media payload. Never blocks; older packets are dropped if the budget is exceeded.
	///
	/// Packets submitted before publishing starts are sent once it does.
	/// Returns false if the session is closing or closed.
	pub fn submit(&self, payload: impl Into<Bytes>, metadata: PacketMetadata) -> bool {
		let Some(dropped) = self.shared.queue.submit(payload.into(), metadata) else {
			return false;
		};

		self.shared.record_dropped(dropped);
		self.shared.monitor.record_queued(self.shared.queue.bytes());
		true
	}

	/// Block the calling thread until the queue is below budget or the timeout elapses.
	///
	/// Returns true if there is space. Don't call from an async task.
	pub fn wait_for_space(&self, timeout: Duration) -> bool {
		self.shared.queue.wait_for_space(timeout)
	}

	/// When the most recent video keyframe was written to the transport.
	pub fn last_keyframe_sent(&self) -> Option<Instant> {
		self.shared.queue.last_keyframe_sent()
	}

	pub fn state(&self) -> SessionState {
		*self.state.borrow()
	}

	/// Watch state transitions.
	pub fn states(&self) -> watch::Receiver<SessionState> {
		self.state.clone()
	}

	pub fn queue_stats(&self) -> QueueStats {
		self.shared.queue.stats()
	}

	/// The most recent throughput estimate.
	pub fn throughput(&self) -> Option<Throughput> {
		self.shared.monitor.latest()
	}

	pub fn destination(&self) -> &Destination {
		&self.shared.destination
	}

	fn result(&self) -> Result<()> {
		match self.shared.error.lock().clone() {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	/// Wait until the session reaches [SessionState::Closed] or [SessionState::Error].
	pub async fn closed(&self) -> Result<()> {
		let mut state = self.state.clone();

		loop {
			let current = *state.borrow_and_update();
			if current.is_terminal() {
				break;
			}

			if state.changed().await.is_err() {
				break;
			}
		}

		self.result()
	}

	/// Stop the session and wait for the network worker to exit.
	///
	/// Unless `force` is set, queued media is flushed and the stream unpublished first.
	pub async fn close(mut self, force: bool) -> Result<()> {
		let mode = match force {
			true => Shutdown::Forced,
			false => Shutdown::Graceful,
		};

		self.shared.queue.close();
		self.shared.shutdown.send_replace(mode);

		if let Some(worker) = self.worker.take() {
			if let Err(err) = worker.await {
				tracing::warn!(%err, "session worker failed");
			}
		}

		if let Some(sampler) = self.sampler.take() {
			sampler.await.ok();
		}

		self.result()
	}
}

impl Drop for Session {
	// Also reached when a pending close() is dropped; a no-op once the worker has exited.
	fn drop(&mut self) {
		self.shared.queue.close();
		self.shared.shutdown.send_replace(Shutdown::Forced);
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use bytes::{Buf, BytesMut};
	use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

	use super::*;
	use crate::{
		amf0::{self, Amf0Value},
		chunk::{ChunkDecoder, ChunkEncoder},
		coding::{Decode, DecodeError, Encode},
		command::Command,
		control::{Control, UserControl},
		handshake,
		message::{Message, MessageType},
	};

	const TIMEOUT: Duration = Duration::from_secs(5);

	struct Pipe(DuplexStream);

	impl Transport for Pipe {
		type Reader = ReadHalf<DuplexStream>;
		type Writer = WriteHalf<DuplexStream>;

		async fn connect(self, _destination: &Destination) -> std::io::Result<(Self::Reader, Self::Writer)> {
			Ok(tokio::io::split(self.0))
		}
	}

	/// Just enough of a server to drive the client through publishing.
	struct Server {
		reader: ReadHalf<DuplexStream>,
		writer: WriteHalf<DuplexStream>,
		decoder: ChunkDecoder,
		encoder: ChunkEncoder,
		buf: BytesMut,
	}

	impl Server {
		fn new(stream: DuplexStream) -> Self {
			let (reader, writer) = tokio::io::split(stream);
			Self {
				reader,
				writer,
				decoder: ChunkDecoder::new(),
				encoder: ChunkEncoder::new(),
				buf: BytesMut::new(),
			}
		}

		async fn handshake(&mut self, corrupt: bool) {
			let mut c0c1 = [0u8; 1 + handshake::SIZE];
			self.reader.read_exact(&mut c0c1).await.unwrap();
			assert_eq!(c0c1[0], handshake::VERSION);

			let mut s0s1 = vec![handshake::VERSION];
			s0s1.extend((0..handshake::SIZE).map(|i| (i % 7) as u8));
			self.writer.write_all(&s0s1).await.unwrap();

			let mut c2 = [0u8; handshake::SIZE];
			self.reader.read_exact(&mut c2).await.unwrap();
			assert_eq!(&c2[8..], &s0s1[9..]);

			let mut s2 = c0c1[1..].to_vec();
			if corrupt {
				s2[700] ^= 0xFF;
			}
			self.writer.write_all(&s2).await.unwrap();
		}

		async fn recv(&mut self) -> Message {
			loop {
				let mut cursor = Cursor::new(&self.buf[..]);
				match self.decoder.decode(&mut cursor) {
					Ok(decoded) => {
						let size = cursor.position() as usize;
						self.buf.advance(size);

						let Some((_, msg)) = decoded else { continue };
						if msg.kind == MessageType::SetChunkSize {
							let mut payload = msg.payload.clone();
							if let Some(Control::SetChunkSize(size)) = Control::decode(msg.kind, &mut payload).unwrap() {
								self.decoder.set_chunk_size(size as usize);
							}
							continue;
						}

						return msg;
					}
					Err(DecodeError::Short) => {
						let size = self.reader.read_buf(&mut self.buf).await.unwrap();
						assert!(size > 0, "client disconnected");
					}
					Err(err) => panic!("decode failed: {err}"),
				}
			}
		}

		async fn recv_command(&mut self) -> Command {
			loop {
				let msg = self.recv().await;
				if msg.kind == MessageType::CommandAmf0 {
					let mut payload = msg.payload;
					return Command::decode(&mut payload).unwrap();
				}
			}
		}

		async fn send(&mut self, csid: u32, msg: Message) {
			let mut buf = BytesMut::new();
			self.encoder.encode(csid, &msg, &mut buf);
			self.writer.write_all(&buf).await.unwrap();
		}

		async fn reply(&mut self, name: &str, id: f64, stream_id: u32, args: Vec<Amf0Value>) {
			let payload = Command::new(name, id, args).encode_bytes();
			self.send(3, Message::new(MessageType::CommandAmf0, stream_id, 0, payload)).await;
		}

		async fn connect(&mut self) {
			let connect = self.recv_command().await;
			assert_eq!(connect.name, "connect");
			assert_eq!(connect.args[0].get("app").and_then(Amf0Value::as_str), Some("live"));
			assert_eq!(
				connect.args[0].get("tcUrl").and_then(Amf0Value::as_str),
				Some("rtmp://localhost:1935/live")
			);

			self.reply(
				"_result",
				connect.transaction_id,
				0,
				vec![Amf0Value::Null, status("status", "NetConnection.Connect.Success")],
			)
			.await;
		}

		async fn publish(&mut self) {
			let release = self.recv_command().await;
			assert_eq!(release.name, "releaseStream");
			assert_eq!(release.args[1].as_str(), Some("key"));
			assert_eq!(self.recv_command().await.name, "FCPublish");

			let create = self.recv_command().await;
			assert_eq!(create.name, "createStream");
			self.reply("_result", create.transaction_id, 0, vec![Amf0Value::Null, Amf0Value::Number(1.0)])
				.await;

			let publish = self.recv_command().await;
			assert_eq!(publish.name, "publish");
			assert_eq!(publish.args[1].as_str(), Some("key"));
			assert_eq!(publish.args[2].as_str(), Some("live"));

			self.reply("onStatus", 0.0, 1, vec![Amf0Value::Null, status("status", "NetStream.Publish.Start")])
				.await;
		}
	}

	fn status(level: &str, code: &str) -> Amf0Value {
		Amf0Value::object([("level", Amf0Value::string(level)), ("code", Amf0Value::string(code))])
	}

	fn params() -> SessionParameters {
		SessionParameters {
			width: 640,
			height: 360,
			frame_duration: 1.0 / 30.0,
			video_bitrate: 1_000_000,
			audio_sample_rate: 44100.0,
			stereo: false,
		}
	}

	fn start() -> (Session, Server, Arc<Mutex<Vec<SessionState>>>) {
		start_with(Config::default())
	}

	fn start_with(config: Config) -> (Session, Server, Arc<Mutex<Vec<SessionState>>>) {
		let (client, server) = tokio::io::duplex(64 * 1024);
		let destination = Destination::parse("rtmp://localhost/live/key").unwrap();

		let seen = Arc::new(Mutex::new(Vec::new()));
		let record = seen.clone();
		let session = Session::connect(Pipe(client), destination, config, move |state| {
			record.lock().push(state)
		});

		(session, Server::new(server), seen)
	}

	async fn wait_for(session: &Session, state: SessionState) {
		let mut states = session.states();
		tokio::time::timeout(TIMEOUT, states.wait_for(|s| *s == state))
			.await
			.expect("timed out")
			.expect("state channel closed");
	}

	#[tokio::test]
	async fn test_publish() {
		let (session, mut server, seen) = start();
		session.set_session_parameters(params());

		// Submitted before publishing; delivered once it starts.
		assert!(session.submit(Bytes::from_static(b"keyframe"), PacketMetadata::video(0, true)));
		assert!(session.submit(Bytes::from_static(b"audio"), PacketMetadata::audio(0)));

		server.handshake(false).await;
		server.connect().await;
		server.publish().await;

		let metadata = server.recv().await;
		assert_eq!(metadata.kind, MessageType::DataAmf0);
		assert_eq!(metadata.stream_id, 1);
		let mut payload = metadata.payload;
		let values = amf0::decode_all(&mut payload).unwrap();
		assert_eq!(values[0].as_str(), Some("@setDataFrame"));
		assert_eq!(values[2].get("width").and_then(Amf0Value::as_number), Some(640.0));

		let video = server.recv().await;
		assert_eq!(video.kind, MessageType::Video);
		assert_eq!(video.stream_id, 1);
		assert_eq!(video.payload.as_ref(), b"keyframe");

		let audio = server.recv().await;
		assert_eq!(audio.kind, MessageType::Audio);
		assert_eq!(audio.payload.as_ref(), b"audio");

		wait_for(&session, SessionState::Publishing).await;
		assert!(session.submit(Bytes::from_static(b"delta"), PacketMetadata::video(33, false)));
		let delta = server.recv().await;
		assert_eq!(delta.timestamp, 33);

		// Graceful close unpublishes.
		let (closed, unpublish) = tokio::join!(session.close(false), async {
			let first = server.recv_command().await;
			let second = server.recv_command().await;
			(first.name, second.name)
		});
		closed.unwrap();
		assert_eq!(unpublish, ("FCUnpublish".to_string(), "deleteStream".to_string()));

		assert_eq!(
			*seen.lock(),
			[
				SessionState::TransportConnecting,
				SessionState::Handshake0Sent,
				SessionState::Handshake1Sent,
				SessionState::HandshakeComplete,
				SessionState::ConnectSent,
				SessionState::ReleaseStreamSent,
				SessionState::FcPublishSent,
				SessionState::CreateStreamSent,
				SessionState::PublishSent,
				SessionState::Publishing,
				SessionState::Closed,
			]
		);
	}

	#[tokio::test]
	async fn test_keyframe_sent() {
		let (session, mut server, _) = start();
		session.set_session_parameters(params());

		server.handshake(false).await;
		server.connect().await;
		server.publish().await;
		wait_for(&session, SessionState::Publishing).await;
		assert!(session.last_keyframe_sent().is_none());

		session.submit(Bytes::from_static(b"key"), PacketMetadata::video(0, true));
		loop {
			if server.recv().await.kind == MessageType::Video {
				break;
			}
		}

		tokio::time::timeout(TIMEOUT, async {
			while session.last_keyframe_sent().is_none() {
				tokio::task::yield_now().await;
			}
		})
		.await
		.unwrap();
	}

	#[tokio::test]
	async fn test_byte_counters() {
		let (client, server) = tokio::io::duplex(64 * 1024);
		let destination = Destination::parse("rtmp://localhost/live/key").unwrap();
		let counters = Arc::new(crate::Counters::default());

		let session = Session::connect_with_stats(
			Pipe(client),
			destination,
			Config::default(),
			|_| {},
			counters.clone(),
		);
		let mut server = Server::new(server);

		server.handshake(false).await;
		server.connect().await;
		server.publish().await;
		wait_for(&session, SessionState::Publishing).await;

		// C0+C1+C2 and S0+S1+S2, plus everything after.
		let snapshot = counters.snapshot();
		assert!(snapshot.tx_bytes > 1 + 2 * handshake::SIZE as u64);
		assert!(snapshot.rx_bytes > 1 + 2 * handshake::SIZE as u64);
		assert_eq!(snapshot.dropped_packets, 0);
	}

	#[tokio::test]
	async fn test_handshake_mismatch() {
		let (session, mut server, seen) = start();
		server.handshake(true).await;

		let err = tokio::time::timeout(TIMEOUT, session.closed()).await.unwrap().unwrap_err();
		assert!(matches!(err, Error::HandshakeMismatch { offset: 700, .. }), "{err:?}");
		assert_eq!(session.state(), SessionState::Error);
		assert!(!seen.lock().contains(&SessionState::HandshakeComplete));
	}

	#[tokio::test]
	async fn test_connect_rejected() {
		let (session, mut server, seen) = start();
		server.handshake(false).await;

		let connect = server.recv_command().await;
		server
			.reply(
				"_error",
				connect.transaction_id,
				0,
				vec![Amf0Value::Null, status("error", "NetConnection.Connect.Rejected")],
			)
			.await;

		let err = tokio::time::timeout(TIMEOUT, session.closed()).await.unwrap().unwrap_err();
		match err {
			Error::Command { command, code } => {
				assert_eq!(command, "connect");
				assert_eq!(code, "NetConnection.Connect.Rejected");
			}
			err => panic!("unexpected error: {err:?}"),
		}

		let seen = seen.lock();
		assert_eq!(seen.last(), Some(&SessionState::Error));
		assert!(!seen.contains(&SessionState::ReleaseStreamSent));
	}

	#[tokio::test]
	async fn test_publish_rejected() {
		let (session, mut server, _) = start();
		server.handshake(false).await;
		server.connect().await;

		for _ in 0..3 {
			server.recv_command().await;
		}
		server.reply("_result", 4.0, 0, vec![Amf0Value::Null, Amf0Value::Number(1.0)]).await;
		assert_eq!(server.recv_command().await.name, "publish");

		server
			.reply("onStatus", 0.0, 1, vec![Amf0Value::Null, status("error", "NetStream.Publish.BadName")])
			.await;

		let err = tokio::time::timeout(TIMEOUT, session.closed()).await.unwrap().unwrap_err();
		assert!(matches!(err, Error::Command { ref code, .. } if code == "NetStream.Publish.BadName"));
	}

	#[tokio::test]
	async fn test_pipelined_command_rejected() {
		for (index, name) in ["releaseStream", "FCPublish", "createStream"].into_iter().enumerate() {
			let (session, mut server, seen) = start();
			server.handshake(false).await;
			server.connect().await;

			let mut commands = Vec::new();
			for _ in 0..3 {
				commands.push(server.recv_command().await);
			}
			assert_eq!(commands[index].name, name);

			server
				.reply("_error", commands[index].transaction_id, 0, vec![Amf0Value::Null, Amf0Value::Null])
				.await;

			let err = tokio::time::timeout(TIMEOUT, session.closed()).await.unwrap().unwrap_err();
			match err {
				Error::Command { command, code } => {
					assert_eq!(command, name);
					assert_eq!(code, "_error");
				}
				err => panic!("unexpected error: {err:?}"),
			}

			let seen = seen.lock();
			assert_eq!(seen.last(), Some(&SessionState::Error));
			assert!(!seen.contains(&SessionState::PublishSent));
		}
	}

	#[tokio::test]
	async fn test_ping() {
		let (session, mut server, _) = start();
		server.handshake(false).await;

		let ping = Control::UserControl(UserControl::PingRequest(1234)).into_message();
		server.send(2, ping).await;

		loop {
			let msg = server.recv().await;
			if msg.kind != MessageType::UserControl {
				continue;
			}

			let mut payload = msg.payload;
			let control = Control::decode(msg.kind, &mut payload).unwrap();
			assert_eq!(control, Some(Control::UserControl(UserControl::PingResponse(1234))));
			break;
		}

		assert!(!session.state().is_terminal());
	}

	#[tokio::test]
	async fn test_unmatched_transaction() {
		let (session, mut server, _) = start();
		session.set_session_parameters(params());
		server.handshake(false).await;

		server.reply("_result", 99.0, 0, vec![Amf0Value::Null]).await;
		server.connect().await;
		server.publish().await;

		wait_for(&session, SessionState::Publishing).await;
	}

	#[tokio::test]
	async fn test_disconnect() {
		let (session, mut server, _) = start();
		server.handshake(false).await;
		drop(server);

		let res = tokio::time::timeout(TIMEOUT, session.closed()).await.unwrap();
		assert!(res.is_err());
		assert_eq!(session.state(), SessionState::Error);
		assert!(!session.submit(Bytes::from_static(b"late"), PacketMetadata::audio(0)));
	}

	#[tokio::test]
	async fn test_force_close() {
		let (session, mut server, seen) = start();
		server.handshake(false).await;
		assert_eq!(server.recv_command().await.name, "connect");

		// The server never answers.
		tokio::time::timeout(TIMEOUT, session.close(true)).await.unwrap().unwrap();
		assert_eq!(seen.lock().last(), Some(&SessionState::Closed));
	}

	#[tokio::test]
	async fn test_abandoned_close() {
		let (session, mut server, seen) = start_with(Config {
			buffer_bytes: Some(1_000_000),
			..Default::default()
		});
		session.set_session_parameters(params());

		server.handshake(false).await;
		server.connect().await;
		server.publish().await;
		wait_for(&session, SessionState::Publishing).await;

		// The server stops reading, so the worker blocks once the pipe fills.
		for ts in 0..16 {
			assert!(session.submit(vec![0u8; 8000], PacketMetadata::video(ts * 33, false)));
		}

		let mut states = session.states();
		let close = tokio::time::timeout(Duration::from_millis(200), session.close(false)).await;
		assert!(close.is_err(), "graceful close should stall");

		// Dropping the pending close forces the worker to stop.
		tokio::time::timeout(TIMEOUT, states.wait_for(|state| state.is_terminal()))
			.await
			.expect("worker still running")
			.ok();

		assert_eq!(seen.lock().last(), Some(&SessionState::Closed));
		drop(server);
	}

	#[tokio::test]
	async fn test_window_acknowledgement() {
		let (_session, mut server, _) = start();
		server.handshake(false).await;

		server.send(2, Control::WindowAckSize(1000).into_message()).await;

		// Enough inbound bytes to cross the window.
		for _ in 0..5 {
			let notice = Command::new("onBWDone", 0.0, vec![Amf0Value::Null, Amf0Value::string("x".repeat(300))]);
			server
				.send(3, Message::new(MessageType::CommandAmf0, 0, 0, notice.encode_bytes()))
				.await;
		}

		loop {
			let msg = server.recv().await;
			if msg.kind == MessageType::Acknowledgement {
				let mut payload = msg.payload;
				let sequence = payload.get_u32();
				assert!(sequence >= 1000, "{sequence}");
				break;
			}
		}
	}
}
