use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn parse_worker_with_overrides() {
	let args = vec![
		"fleet",
		"-vv",
		"worker",
		"--group",
		"browsers",
		"-c",
		"worker-3",
		"--prefix",
		"browser.",
		"--exit-on-eof",
	];
	let cli = Cli::try_parse_from(args).unwrap();

	assert_eq!(cli.verbose, 2);
	match cli.command {
		Commands::Worker(args) => {
			assert_eq!(args.group.as_deref(), Some("browsers"));
			assert_eq!(args.consumer.as_deref(), Some("worker-3"));
			assert_eq!(args.prefix.as_deref(), Some("browser."));
			assert_eq!(args.stream, None);
			assert!(args.exit_on_eof);
		}
		_ => panic!("Expected Worker command"),
	}
}

#[test]
fn parse_worker_defaults() {
	let cli = Cli::try_parse_from(["fleet", "worker"]).unwrap();

	assert_eq!(cli.verbose, 0);
	assert_eq!(cli.config, None);
	match cli.command {
		Commands::Worker(args) => {
			assert_eq!(args.metrics_interval_ms, None);
			assert!(!args.exit_on_eof);
		}
		_ => panic!("Expected Worker command"),
	}
}

#[test]
fn global_config_after_subcommand() {
	let cli = Cli::try_parse_from(["fleet", "serve", "--queue-capacity", "8", "--config", "/tmp/fleet.json"]).unwrap();

	assert_eq!(cli.config, Some(PathBuf::from("/tmp/fleet.json")));
	match cli.command {
		Commands::Serve(args) => assert_eq!(args.queue_capacity, Some(8)),
		_ => panic!("Expected Serve command"),
	}
}

#[test]
fn subcommand_is_required() {
	assert!(Cli::try_parse_from(["fleet"]).is_err());
	assert!(Cli::try_parse_from(["fleet", "serve", "--queue-capacity", "many"]).is_err());
}
