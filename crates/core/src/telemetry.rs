use std::time::Instant;

use once_cell::sync::Lazy;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub static APPLICATION_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Initializes the global tracing subscriber. The filter comes from
/// `RUST_LOG` (default `info`); `LOG_FORMAT=json` switches to newline
/// delimited JSON with flattened fields.
pub fn setup_logging() {
	Lazy::force(&APPLICATION_START_TIME);
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let json = std::env::var("LOG_FORMAT")
		.map(|f| f.eq_ignore_ascii_case("json"))
		.unwrap_or(false);
	if json {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().json().flatten_event(true))
			.init();
	} else {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer())
			.init();
	}
}

pub mod testing {
	use tracing_subscriber::prelude::*;
	use tracing_subscriber::{EnvFilter, fmt};

	/// Test variant of [super::setup_logging]: writes through the test
	/// capture writer and tolerates repeated initialization across tests.
	pub fn setup_test_logging() {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
		let _ = tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().with_test_writer())
			.try_init();
	}
}
