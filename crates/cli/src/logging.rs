use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the stderr subscriber. `RUST_LOG` wins over `verbosity`.
pub fn init_logging(verbosity: u8) {
	// 0 = warnings from fleet crates only
	// 1 (-v) = session, pool and worker lifecycle events
	// 2+ (-vv) = per-job and per-command detail, plus reqwest
	let filter = match verbosity {
		0 => "warn,reqwest=off,hyper=off",
		1 => "info,fleet_cli=info,reqwest=warn,hyper=warn",
		_ => "debug,hyper=info",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
