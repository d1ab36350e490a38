use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
	amf0::{self, Amf0Value},
	coding::*,
	model::SessionParameters,
};

/// An AMF0 command: name, transaction id, then the command object and arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
	pub name: String,
	pub transaction_id: f64,
	pub args: Vec<Amf0Value>,
}

impl Command {
	pub fn new(name: &str, transaction_id: f64, args: Vec<Amf0Value>) -> Self {
		Self {
			name: name.to_string(),
			transaction_id,
			args,
		}
	}

	pub fn connect(transaction_id: f64, app: &str, flash_version: &str, tc_url: &str) -> Self {
		let object = Amf0Value::object([
			("app", Amf0Value::string(app)),
			("type", Amf0Value::string("nonprivate")),
			("flashVer", Amf0Value::string(flash_version)),
			("swfUrl", Amf0Value::string(tc_url)),
			("tcUrl", Amf0Value::string(tc_url)),
		]);

		Self::new("connect", transaction_id, vec![object])
	}

	pub fn release_stream(transaction_id: f64, stream_key: &str) -> Self {
		Self::new(
			"releaseStream",
			transaction_id,
			vec![Amf0Value::Null, Amf0Value::string(stream_key)],
		)
	}

	pub fn fc_publish(transaction_id: f64, stream_key: &str) -> Self {
		Self::new(
			"FCPublish",
			transaction_id,
			vec![Amf0Value::Null, Amf0Value::string(stream_key)],
		)
	}

	pub fn create_stream(transaction_id: f64) -> Self {
		Self::new("createStream", transaction_id, vec![Amf0Value::Null])
	}

	pub fn publish(transaction_id: f64, stream_key: &str) -> Self {
		Self::new(
			"publish",
			transaction_id,
			vec![Amf0Value::Null, Amf0Value::string(stream_key), Amf0Value::string("live")],
		)
	}

	pub fn fc_unpublish(transaction_id: f64, stream_key: &str) -> Self {
		Self::new(
			"FCUnpublish",
			transaction_id,
			vec![Amf0Value::Null, Amf0Value::string(stream_key)],
		)
	}

	pub fn delete_stream(transaction_id: f64, stream_id: u32) -> Self {
		Self::new(
			"deleteStream",
			transaction_id,
			vec![Amf0Value::Null, Amf0Value::Number(stream_id as f64)],
		)
	}

	/// The first object argument carrying a `code`, as sent with `onStatus`, `_result` and `_error`.
	pub fn status(&self) -> Option<Status> {
		self.args.iter().find_map(Status::from_value)
	}

	/// The stream id returned by a `createStream` result.
	pub fn stream_id(&self) -> Option<u32> {
		let id = self.args.iter().find_map(Amf0Value::as_number)?;
		match id >= 0.0 && id <= u32::MAX as f64 && id.fract() == 0.0 {
			true => Some(id as u32),
			false => None,
		}
	}
}

impl Encode for Command {
	fn encode<W: BufMut>(&self, w: &mut W) {
		Amf0Value::string(self.name.as_str()).encode(w);
		Amf0Value::Number(self.transaction_id).encode(w);
		for arg in &self.args {
			arg.encode(w);
		}
	}
}

impl Decode for Command {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let name = match Amf0Value::decode(r)? {
			Amf0Value::String(name) => name,
			_ => return Err(DecodeError::InvalidValue),
		};

		// Some servers omit the transaction id on notifications.
		let mut args = amf0::decode_all(r)?;
		let transaction_id = match args.first() {
			Some(Amf0Value::Number(id)) => {
				let id = *id;
				args.remove(0);
				id
			}
			_ => 0.0,
		};

		Ok(Self {
			name,
			transaction_id,
			args,
		})
	}
}

/// The status object attached to command replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
	pub level: String,
	pub code: String,
	pub description: Option<String>,
}

impl Status {
	pub const PUBLISH_START: &'static str = "NetStream.Publish.Start";

	fn from_value(value: &Amf0Value) -> Option<Self> {
		let code = value.get("code")?.as_str()?.to_string();
		let level = value.get("level").and_then(Amf0Value::as_str).unwrap_or("status");

		Some(Self {
			level: level.to_string(),
			code,
			description: value.get("description").and_then(Amf0Value::as_str).map(str::to_string),
		})
	}

	pub fn is_error(&self) -> bool {
		self.level == "error"
	}
}

/// Build the `@setDataFrame onMetaData` data message payload.
pub fn metadata(params: &SessionParameters) -> Bytes {
	let props = vec![
		("width".to_string(), Amf0Value::Number(params.width as f64)),
		("height".to_string(), Amf0Value::Number(params.height as f64)),
		("displayWidth".to_string(), Amf0Value::Number(params.width as f64)),
		("displayHeight".to_string(), Amf0Value::Number(params.height as f64)),
		("framewidth".to_string(), Amf0Value::Number(params.width as f64)),
		("frameheight".to_string(), Amf0Value::Number(params.height as f64)),
		("framerate".to_string(), Amf0Value::Number(params.frame_rate())),
		("videoframerate".to_string(), Amf0Value::Number(params.frame_rate())),
		// H.264
		("videocodecid".to_string(), Amf0Value::Number(7.0)),
		(
			"videodatarate".to_string(),
			Amf0Value::Number(params.video_bitrate as f64 / 1024.0),
		),
		// AAC
		("audiocodecid".to_string(), Amf0Value::Number(10.0)),
		("audiosamplerate".to_string(), Amf0Value::Number(params.audio_sample_rate)),
		("audiosamplesize".to_string(), Amf0Value::Number(16.0)),
		(
			"audiochannels".to_string(),
			Amf0Value::Number(if params.stereo { 2.0 } else { 1.0 }),
		),
		("stereo".to_string(), Amf0Value::Boolean(params.stereo)),
	];

	let mut buf = BytesMut::new();
	Amf0Value::string("@setDataFrame").encode(&mut buf);
	Amf0Value::string("onMetaData").encode(&mut buf);
	Amf0Value::EcmaArray(props).encode(&mut buf);
	buf.freeze()
}

/// Commands that expect a reply keyed by transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invoke {
	Connect,
	ReleaseStream,
	FcPublish,
	CreateStream,
	Publish,
	FcUnpublish,
	DeleteStream,
}

impl Invoke {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Connect => "connect",
			Self::ReleaseStream => "releaseStream",
			Self::FcPublish => "FCPublish",
			Self::CreateStream => "createStream",
			Self::Publish => "publish",
			Self::FcUnpublish => "FCUnpublish",
			Self::DeleteStream => "deleteStream",
		}
	}
}

/// Outstanding transaction ids, matched against `_result` and `_error`.
#[derive(Debug)]
pub struct Transactions {
	next: u32,
	pending: HashMap<u32, Invoke>,
}

impl Default for Transactions {
	fn default() -> Self {
		Self {
			next: 1,
			pending: HashMap::new(),
		}
	}
}

impl Transactions {
	/// Allocate the next id; ids increase monotonically and are never reused.
	pub fn start(&mut self, invoke: Invoke) -> f64 {
		let id = self.next;
		self.next += 1;
		self.pending.insert(id, invoke);
		id as f64
	}

	/// Remove and return the command the id was allocated for.
	pub fn resolve(&mut self, id: f64) -> Option<Invoke> {
		if id < 1.0 || id.fract() != 0.0 || id > u32::MAX as f64 {
			return None;
		}

		self.pending.remove(&(id as u32))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_connect_encoding() {
		let cmd = Command::connect(1.0, "live", "FMLE/3.0", "rtmp://example.com:1935/live");
		let encoded = cmd.encode_bytes();

		let mut buf = encoded.clone();
		let decoded = Command::decode(&mut buf).unwrap();
		assert_eq!(decoded, cmd);

		// Property order is preserved on the wire.
		let keys: Vec<_> = decoded.args[0]
			.properties()
			.unwrap()
			.iter()
			.map(|(k, _)| k.as_str())
			.collect();
		assert_eq!(keys, ["app", "type", "flashVer", "swfUrl", "tcUrl"]);
	}

	#[test]
	fn test_status() {
		let cmd = Command::new(
			"onStatus",
			0.0,
			vec![
				Amf0Value::Null,
				Amf0Value::object([
					("level", Amf0Value::string("error")),
					("code", Amf0Value::string("NetStream.Publish.BadName")),
					("description", Amf0Value::string("already publishing")),
				]),
			],
		);

		let status = cmd.status().unwrap();
		assert!(status.is_error());
		assert_eq!(status.code, "NetStream.Publish.BadName");
		assert_eq!(status.description.as_deref(), Some("already publishing"));
	}

	#[test]
	fn test_create_stream_result() {
		let cmd = Command::new("_result", 4.0, vec![Amf0Value::Null, Amf0Value::Number(1.0)]);
		let mut buf = cmd.encode_bytes();
		let decoded = Command::decode(&mut buf).unwrap();
		assert_eq!(decoded.transaction_id, 4.0);
		assert_eq!(decoded.stream_id(), Some(1));

		let cmd = Command::new("_result", 4.0, vec![Amf0Value::Null, Amf0Value::Number(-1.0)]);
		assert_eq!(cmd.stream_id(), None);
	}

	#[test]
	fn test_transactions() {
		let mut txns = Transactions::default();
		let connect = txns.start(Invoke::Connect);
		let create = txns.start(Invoke::CreateStream);
		assert_eq!(connect, 1.0);
		assert_eq!(create, 2.0);

		assert_eq!(txns.resolve(create), Some(Invoke::CreateStream));
		assert_eq!(txns.resolve(create), None);
		assert_eq!(txns.resolve(42.0), None);
		assert_eq!(txns.resolve(1.5), None);
		assert_eq!(txns.resolve(connect), Some(Invoke::Connect));

		// Never reused.
		assert_eq!(txns.start(Invoke::Publish), 3.0);
	}

	#[test]
	fn test_metadata() {
		let params = SessionParameters {
			width: 1280,
			height: 720,
			frame_duration: 1.0 / 30.0,
			video_bitrate: 2_000_000,
			audio_sample_rate: 44100.0,
			stereo: true,
		};

		let mut buf = metadata(&params);
		let values = amf0::decode_all(&mut buf).unwrap();
		assert_eq!(values[0].as_str(), Some("@setDataFrame"));
		assert_eq!(values[1].as_str(), Some("onMetaData"));
		assert_eq!(values[2].get("width").and_then(Amf0Value::as_number), Some(1280.0));
		assert_eq!(values[2].get("audiochannels").and_then(Amf0Value::as_number), Some(2.0));
		assert_eq!(values[2].get("stereo"), Some(&Amf0Value::Boolean(true)));
	}
}
