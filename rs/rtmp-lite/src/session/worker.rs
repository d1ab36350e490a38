use std::{io::Cursor, sync::Arc};

use bytes::{Buf, BytesMut};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	sync::watch,
};

use super::{SessionState, Shared};
use crate::{
	chunk::{ChunkDecoder, ChunkEncoder},
	coding::{Decode, DecodeError, Encode},
	command::{self, Command, Invoke, Status, Transactions},
	control::{Control, UserControl},
	handshake::{self, Handshake},
	message::{csid, Message, MessageType},
	transport::{Transport, TransportStatus},
	Error, Result,
};

// Packets written before checking the socket and shutdown again.
const DRAIN_BATCH: usize = 32;

const READ_SIZE: usize = 4096;

/// How the session was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shutdown {
	Running,
	/// Drain the queue and unpublish first.
	Graceful,
	/// Stop immediately.
	Forced,
}

/// Wait for any shutdown request.
async fn requested(shutdown: &mut watch::Receiver<Shutdown>) -> Shutdown {
	loop {
		let mode = *shutdown.borrow_and_update();
		if mode != Shutdown::Running {
			return mode;
		}

		if shutdown.changed().await.is_err() {
			return Shutdown::Forced;
		}
	}
}

async fn forced(shutdown: &mut watch::Receiver<Shutdown>) {
	while requested(shutdown).await != Shutdown::Forced {
		if shutdown.changed().await.is_err() {
			return;
		}
	}
}

fn transport_status(shared: &Shared, status: TransportStatus) {
	tracing::debug!(?status, destination = %shared.destination, "transport");

	if status == TransportStatus::Connecting {
		shared.state.set(SessionState::TransportConnecting);
	}
}

/// Run the session to completion, recording the outcome in the shared state.
pub(super) async fn run<T: Transport>(transport: T, shared: Arc<Shared>) {
	let mut shutdown = shared.shutdown.subscribe();

	let res = tokio::select! {
		res = start(transport, shared.clone()) => res,
		_ = forced(&mut shutdown) => Err(Error::Cancel),
	};

	// Reject submissions before anyone observes the terminal state.
	shared.queue.close();
	shared.sampling.send_replace(true);

	match res {
		Ok(()) | Err(Error::Cancel) => {
			tracing::info!("session closed");
			shared.state.set(SessionState::Closed);
		}
		Err(err) => {
			tracing::warn!(%err, "session error");
			shared.error.lock().get_or_insert(err);
			shared.state.set(SessionState::Error);
		}
	}
}

async fn start<T: Transport>(transport: T, shared: Arc<Shared>) -> Result<()> {
	let mut shutdown = shared.shutdown.subscribe();

	transport_status(&shared, TransportStatus::Connecting);

	let res = tokio::select! {
		res = transport.connect(&shared.destination) => res,
		_ = requested(&mut shutdown) => return Ok(()),
	};

	let (reader, writer) = match res {
		Ok(halves) => halves,
		Err(err) => {
			transport_status(&shared, TransportStatus::Error);
			return Err(err.into());
		}
	};

	transport_status(&shared, TransportStatus::Connected);

	let res = Worker::new(reader, writer, shared.clone()).run(shutdown).await;
	match &res {
		Err(Error::Disconnected) => transport_status(&shared, TransportStatus::End),
		Err(Error::Transport(_)) => transport_status(&shared, TransportStatus::Error),
		_ => {}
	}

	res
}

/// Owns the transport and all per-connection protocol state.
struct Worker<R, W> {
	reader: R,
	writer: W,
	shared: Arc<Shared>,

	encoder: ChunkEncoder,
	decoder: ChunkDecoder,
	transactions: Transactions,

	inbound: BytesMut,
	outbound: BytesMut,

	// The message stream returned by createStream.
	stream_id: u32,

	window_ack_size: u32,
	received: u64,
	acknowledged: u64,
	peer_bandwidth: Option<u32>,
}

impl<R, W> Worker<R, W>
where
	R: tokio::io::AsyncRead + Unpin,
	W: tokio::io::AsyncWrite + Unpin,
{
	fn new(reader: R, writer: W, shared: Arc<Shared>) -> Self {
		let window_ack_size = shared.config.window_ack_size;

		Self {
			reader,
			writer,
			shared,
			encoder: ChunkEncoder::new(),
			decoder: ChunkDecoder::new(),
			transactions: Transactions::default(),
			inbound: BytesMut::new(),
			outbound: BytesMut::new(),
			stream_id: 0,
			window_ack_size,
			received: 0,
			acknowledged: 0,
			peer_bandwidth: None,
		}
	}

	fn state(&self) -> SessionState {
		self.shared.state.get()
	}

	fn set_state(&self, state: SessionState) {
		self.shared.state.set(state);
	}

	async fn run(mut self, mut shutdown: watch::Receiver<Shutdown>) -> Result<()> {
		tokio::select! {
			res = self.handshake() => res?,
			_ = requested(&mut shutdown) => return Ok(()),
		}

		let chunk_size = self.shared.config.chunk_size.clamp(1, Control::MAX_CHUNK_SIZE);
		self.send_control(Control::SetChunkSize(chunk_size));
		self.encoder.set_chunk_size(chunk_size as usize);

		let app = self.shared.destination.app.clone();
		let tc_url = self.shared.destination.tc_url();
		let flash_version = self.shared.config.flash_version.clone();
		self.invoke(Invoke::Connect, 0, |id| Command::connect(id, &app, &flash_version, &tc_url));
		self.flush().await?;
		self.set_state(SessionState::ConnectSent);

		loop {
			let publishing = self.state() == SessionState::Publishing;
			let backlog = publishing && !self.shared.queue.is_empty();

			self.inbound.reserve(READ_SIZE);

			tokio::select! {
				mode = requested(&mut shutdown) => return self.close(mode).await,
				res = self.reader.read_buf(&mut self.inbound) => {
					let size = res?;
					if size == 0 {
						return Err(Error::Disconnected);
					}

					self.received += size as u64;
					self.shared.stats.add_rx_bytes(size as u64);

					self.recv()?;
					self.flush().await?;
				}
				_ = self.shared.queue.ready(), if publishing && !backlog => {}
				_ = std::future::ready(()), if backlog => self.drain(DRAIN_BATCH).await?,
			}
		}
	}

	async fn handshake(&mut self) -> Result<()> {
		let handshake = Handshake::new();

		let c0c1 = handshake.c0c1();
		self.writer.write_all(&c0c1).await?;
		self.writer.flush().await?;
		self.set_state(SessionState::Handshake0Sent);

		let mut s0s1 = [0u8; 1 + handshake::SIZE];
		self.reader.read_exact(&mut s0s1).await?;

		let c2 = handshake.c2(&s0s1)?;
		self.writer.write_all(&c2).await?;
		self.writer.flush().await?;
		self.set_state(SessionState::Handshake1Sent);

		let mut s2 = [0u8; handshake::SIZE];
		self.reader.read_exact(&mut s2).await?;
		handshake.verify(&s2)?;

		self.shared.stats.add_tx_bytes((c0c1.len() + c2.len()) as u64);
		self.shared.stats.add_rx_bytes((s0s1.len() + s2.len()) as u64);

		self.set_state(SessionState::HandshakeComplete);
		Ok(())
	}

	async fn close(&mut self, mode: Shutdown) -> Result<()> {
		if mode == Shutdown::Graceful && self.state() == SessionState::Publishing {
			self.drain(usize::MAX).await?;

			let key = self.shared.destination.stream_key.clone();
			let stream_id = self.stream_id;
			self.invoke(Invoke::FcUnpublish, 0, |id| Command::fc_unpublish(id, &key));
			self.invoke(Invoke::DeleteStream, 0, |id| Command::delete_stream(id, stream_id));
			self.flush().await?;
		}

		if let Err(err) = self.writer.shutdown().await {
			tracing::debug!(%err, "failed to shut down transport");
		}

		Ok(())
	}

	/// Chunk and send up to `limit` queued packets.
	async fn drain(&mut self, limit: usize) -> Result<()> {
		for _ in 0..limit {
			let Some(packet) = self.shared.queue.pop() else {
				break;
			};

			let metadata = packet.metadata;
			let stream_id = match metadata.stream_id {
				0 => self.stream_id,
				id => id,
			};

			let msg = Message::new(metadata.kind, stream_id, metadata.timestamp, packet.payload.clone());
			self.encoder.encode(csid::for_kind(metadata.kind), &msg, &mut self.outbound);
			self.flush().await?;

			self.shared.queue.mark_sent(&packet);
			self.shared.monitor.record_queued(self.shared.queue.bytes());
		}

		Ok(())
	}

	async fn flush(&mut self) -> Result<()> {
		if self.outbound.is_empty() {
			return Ok(());
		}

		let size = self.outbound.len();
		tracing::trace!(size, head = %hex::encode(&self.outbound[..size.min(32)]), "send");

		self.writer.write_all(&self.outbound).await?;
		self.writer.flush().await?;
		self.outbound.clear();

		self.shared.stats.add_tx_bytes(size as u64);
		self.shared.monitor.record_sent(size);

		Ok(())
	}

	fn send_control(&mut self, control: Control) {
		tracing::trace!(?control, "send control");
		let msg = control.into_message();
		self.encoder.encode(csid::CONTROL, &msg, &mut self.outbound);
	}

	fn invoke(&mut self, invoke: Invoke, stream_id: u32, build: impl FnOnce(f64) -> Command) {
		let id = self.transactions.start(invoke);
		let command = build(id);
		tracing::debug!(name = %command.name, id, stream_id, "send command");

		let msg = Message::new(MessageType::CommandAmf0, stream_id, 0, command.encode_bytes());
		self.encoder.encode(csid::COMMAND, &msg, &mut self.outbound);
	}

	/// Decode every complete chunk buffered so far.
	fn recv(&mut self) -> Result<()> {
		loop {
			let mut cursor = Cursor::new(&self.inbound[..]);
			let decoded = match self.decoder.decode(&mut cursor) {
				Ok(decoded) => decoded,
				Err(DecodeError::Short) => break,
				Err(err) => return Err(Error::Framing(err.to_string())),
			};

			let size = cursor.position() as usize;
			self.inbound.advance(size);

			if let Some((csid, msg)) = decoded {
				self.on_message(csid, msg)?;
			}
		}

		self.acknowledge();
		Ok(())
	}

	fn acknowledge(&mut self) {
		if self.window_ack_size == 0 || self.received - self.acknowledged < self.window_ack_size as u64 {
			return;
		}

		self.acknowledged = self.received;
		// The sequence number wraps.
		self.send_control(Control::Acknowledgement(self.received as u32));
	}

	fn on_message(&mut self, chunk_stream: u32, msg: Message) -> Result<()> {
		if chunk_stream == csid::CONTROL || msg.kind.is_control() {
			return self.on_control(msg);
		}

		let mut payload = msg.payload;
		match msg.kind {
			MessageType::CommandAmf0 => {
				let command = Command::decode(&mut payload)?;
				self.on_command(command)
			}
			MessageType::CommandAmf3 => {
				// A format byte precedes the AMF0 body.
				if payload.has_remaining() {
					payload.advance(1);
				}

				let command = Command::decode(&mut payload)?;
				self.on_command(command)
			}
			kind => {
				tracing::trace!(?kind, size = payload.len(), "ignoring message");
				Ok(())
			}
		}
	}

	fn on_control(&mut self, msg: Message) -> Result<()> {
		let mut payload = msg.payload;
		let Some(control) = Control::decode(msg.kind, &mut payload)? else {
			tracing::warn!(kind = ?msg.kind, "ignoring non-control message on the control stream");
			return Ok(());
		};

		tracing::trace!(?control, "recv control");

		match control {
			Control::SetChunkSize(size) => self.decoder.set_chunk_size(size as usize),
			Control::Abort(csid) => {
				self.decoder.abort(csid);
			}
			Control::Acknowledgement(_) => {}
			Control::WindowAckSize(size) => self.window_ack_size = size,
			Control::SetPeerBandwidth { size, limit } => {
				tracing::debug!(size, ?limit, "peer bandwidth");
				if self.peer_bandwidth != Some(size) {
					self.peer_bandwidth = Some(size);
					self.send_control(Control::WindowAckSize(size));
				}
			}
			Control::UserControl(UserControl::PingRequest(timestamp)) => {
				self.send_control(Control::UserControl(UserControl::PingResponse(timestamp)));
			}
			Control::UserControl(event) => tracing::debug!(?event, "user control"),
		}

		Ok(())
	}

	fn on_command(&mut self, command: Command) -> Result<()> {
		tracing::debug!(name = %command.name, id = command.transaction_id, "recv command");

		match command.name.as_str() {
			"_result" | "_error" => self.on_reply(command),
			"onStatus" => self.on_status(command),
			_ => Ok(()),
		}
	}

	fn on_reply(&mut self, command: Command) -> Result<()> {
		let Some(invoke) = self.transactions.resolve(command.transaction_id) else {
			tracing::warn!(name = %command.name, id = command.transaction_id, "unmatched transaction");
			return Ok(());
		};

		let status = command.status();
		if command.name == "_error" || status.as_ref().is_some_and(Status::is_error) {
			let code = match status {
				Some(status) => status.code,
				None => command.name,
			};

			return Err(Error::Command {
				command: invoke.name().to_string(),
				code,
			});
		}

		match invoke {
			Invoke::Connect => self.on_connected(),
			Invoke::CreateStream => {
				let stream_id = command.stream_id().ok_or(DecodeError::Missing)?;
				self.on_stream_created(stream_id)
			}
			invoke => {
				tracing::debug!(command = invoke.name(), "result");
				Ok(())
			}
		}
	}

	fn on_connected(&mut self) -> Result<()> {
		let key = self.shared.destination.stream_key.clone();

		// Pipelined; servers answer them in order.
		self.invoke(Invoke::ReleaseStream, 0, |id| Command::release_stream(id, &key));
		self.set_state(SessionState::ReleaseStreamSent);

		self.invoke(Invoke::FcPublish, 0, |id| Command::fc_publish(id, &key));
		self.set_state(SessionState::FcPublishSent);

		self.invoke(Invoke::CreateStream, 0, Command::create_stream);
		self.set_state(SessionState::CreateStreamSent);

		Ok(())
	}

	fn on_stream_created(&mut self, stream_id: u32) -> Result<()> {
		tracing::debug!(stream_id, "stream created");
		self.stream_id = stream_id;

		let millis = self.shared.config.server_buffer.as_millis().min(u32::MAX as u128) as u32;
		self.send_control(Control::UserControl(UserControl::SetBufferLength { stream_id, millis }));

		let key = self.shared.destination.stream_key.clone();
		self.invoke(Invoke::Publish, stream_id, |id| Command::publish(id, &key));
		self.set_state(SessionState::PublishSent);

		Ok(())
	}

	fn on_status(&mut self, command: Command) -> Result<()> {
		let Some(status) = command.status() else {
			tracing::warn!("onStatus without a status object");
			return Ok(());
		};

		if status.is_error() {
			let command = match self.state() {
				SessionState::PublishSent => Invoke::Publish.name().to_string(),
				_ => command.name,
			};

			return Err(Error::Command {
				command,
				code: status.code,
			});
		}

		tracing::info!(code = %status.code, "status");

		if status.code == Status::PUBLISH_START && self.state() == SessionState::PublishSent {
			self.set_state(SessionState::Publishing);
			self.send_metadata();
		}

		Ok(())
	}

	fn send_metadata(&mut self) {
		let Some(params) = *self.shared.params.lock() else {
			tracing::warn!("no session parameters, skipping metadata");
			return;
		};

		let msg = Message::new(MessageType::DataAmf0, self.stream_id, 0, command::metadata(&params));
		self.encoder.encode(csid::DATA, &msg, &mut self.outbound);
	}
}
