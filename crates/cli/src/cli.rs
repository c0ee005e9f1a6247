use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "fleet")]
#[command(about = "Session-scoped automation engines behind a job broker")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file (defaults to ~/.config/fleet/config.json when present)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Consume NDJSON jobs from stdin and route them to browser engines
	Worker(WorkerArgs),

	/// Drive per-session command queues from NDJSON requests on stdin
	Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
	/// Stream name jobs are published to
	#[arg(long)]
	pub stream: Option<String>,

	/// Consumer group
	#[arg(short, long)]
	pub group: Option<String>,

	/// Consumer name within the group
	#[arg(short, long)]
	pub consumer: Option<String>,

	/// Only take jobs whose type starts with this prefix
	#[arg(long, value_name = "PREFIX")]
	pub prefix: Option<String>,

	/// Interval between queue metrics log lines
	#[arg(long, value_name = "MS")]
	pub metrics_interval_ms: Option<u64>,

	/// Exit once stdin is closed and every job has been handled
	#[arg(long)]
	pub exit_on_eof: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ServeArgs {
	/// Commands a session may queue before requests are rejected
	#[arg(long, value_name = "N")]
	pub queue_capacity: Option<usize>,
}

#[cfg(test)]
mod tests;
