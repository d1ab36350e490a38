use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging configuration.
#[derive(Args, Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Log {
	/// The default log level; `RUST_LOG` directives take precedence.
	#[arg(long = "log-level", env = "RTMP_LOG_LEVEL", default_value = "info")]
	pub level: String,
}

impl Default for Log {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
		}
	}
}

impl Log {
	/// The configured level, or INFO if it doesn't parse.
	pub fn level(&self) -> LevelFilter {
		self.level.parse().unwrap_or(LevelFilter::INFO)
	}

	/// Install a stderr subscriber. Fails if one is already installed.
	pub fn init(&self) -> anyhow::Result<()> {
		let filter = EnvFilter::builder()
			.with_default_directive(self.level().into())
			.from_env_lossy();

		let fmt_layer = tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.with_filter(filter);

		tracing_subscriber::registry().with(fmt_layer).try_init()?;
		Ok(())
	}
}
