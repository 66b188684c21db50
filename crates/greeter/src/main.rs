//! Greeter client binary.
//!
//! Serves the greeter in-process at `--target`, then greets `--name` through
//! the completion-queue client and prints the reply.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use cqrpc::{ClientConfig, Dispatcher, LocalTransport};
use cqrpc_greeter::{GreeterClient, greeter_server};
use tracing::info;

/// Greeter client command line arguments.
#[derive(Parser, Debug)]
#[command(name = "greeter-client")]
#[command(about = "Say hello through a tag-correlated completion queue")]
struct Args {
	/// Endpoint the greeter is bound to
	#[arg(short, long, default_value = "localhost:50051")]
	target: String,

	/// Name to greet
	#[arg(short, long, default_value = "world")]
	name: String,

	/// Client configuration file (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Number of concurrent greetings; more than one runs them through a dispatcher
	#[arg(long, default_value_t = 1)]
	concurrency: usize,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => ClientConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => ClientConfig::default(),
	};
	info!(endpoint = %args.target, ?config, "starting greeter-client");

	let transport = LocalTransport::with_max_message_size(config.max_message_size);
	transport.bind(args.target.as_str(), greeter_server());
	let thread_name = config.dispatcher_thread_name.clone();
	let client = GreeterClient::new(transport.channel_with_config(args.target.as_str(), config));

	if args.concurrency <= 1 {
		let reply = client.say_hello(&args.name);
		println!("Greeter received: {reply}");
		return Ok(());
	}

	let dispatcher = Dispatcher::spawn_named(thread_name).context("spawning dispatcher")?;
	let pending = (0..args.concurrency)
		.map(|i| client.say_hello_dispatched(&format!("{} #{i}", args.name), &dispatcher))
		.collect::<Result<Vec<_>, _>>()?;
	for reply in pending {
		match reply.wait() {
			Ok(reply) => println!("Greeter received: {}", reply.message),
			Err(error) => {
				tracing::warn!(%error, "greeter.call_failed");
				println!("Greeter received: RPC failed");
			}
		}
	}
	let dispatched = dispatcher.shutdown();
	info!(dispatched, "greeter-client done");
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("cqrpc=trace,cqrpc_greeter=debug,info")
		} else {
			EnvFilter::new("warn")
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}
