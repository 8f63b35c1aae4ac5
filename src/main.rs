use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use khronos::agent::Agent;
use khronos::config::{Cli, Command, Config};
use khronos::kv::InMemoryKv;
use khronos::placement::Rebalance;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::reload;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long a graceful shutdown is given before the process exits anyway.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(3);

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let Command::Agent(args) = cli.command;
    let config = Config::load(&args)?;

    let filter_handle = init_logging(&config.log_level);

    tracing::info!(node = %config.node_name, env = %config.runmode, "khronos: starting agent");

    // The only `KvStore` this crate ships is the in-memory one; a real
    // deployment would plug in an etcd/consul/zk/redis adapter here instead.
    let kv = Arc::new(InMemoryKv::new());
    let agent = Agent::new(kv, config.keyspace.clone(), Rebalance::LeastLoaded);

    let rpc_addr = config.rpc_addr();
    let agent_for_run = agent.clone();
    let run_handle = tokio::spawn(async move { agent_for_run.run(rpc_addr).await });

    let code = handle_signals(filter_handle).await;
    if run_handle.is_finished() {
        if let Ok(Err(e)) = run_handle.await {
            tracing::error!(err = %e, "khronos: rpc server exited with error");
            return Ok(ExitCode::FAILURE);
        }
    }

    Ok(if code == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Installs the tracing subscriber behind a `reload::Layer` so `SIGHUP`
/// can swap the `EnvFilter` directive without re-initializing the global
/// subscriber (which would panic on a second call).
fn init_logging(level: &str) -> FilterHandle {
    let default_directive = format!("{level},khronos={level}");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let (filter_layer, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    handle
}

/// Blocks until an exit-causing signal arrives. `SIGHUP` triggers a config
/// reload and loops; `SIGINT`/`SIGTERM` attempt a graceful shutdown within
/// `GRACEFUL_TIMEOUT` before returning. Returns the process exit code.
async fn handle_signals(filter_handle: FilterHandle) -> i32 {
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    loop {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
            _ = sighup.recv() => {
                tracing::info!("khronos: caught SIGHUP, reloading config");
                handle_reload(&filter_handle);
                continue;
            }
        }

        tracing::info!("khronos: gracefully shutting down agent...");
        let leave_done = tokio::spawn(async { Ok::<(), anyhow::Error>(()) });

        tokio::select! {
            _ = sigint.recv() => return 1,
            _ = sigterm.recv() => return 1,
            _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => return 1,
            res = leave_done => {
                return if res.is_ok() { 0 } else { 1 };
            }
        }
    }
}

/// Re-parses CLI args/env and swaps the log filter to match. Values the
/// Scheduler consumes (jobs, keyspace) are re-read fresh on its own
/// 15-minute reload tick (see `Agent::reload_loop`) rather than here.
fn handle_reload(filter_handle: &FilterHandle) {
    let parsed = match Cli::try_parse() {
        Ok(Cli { command: Command::Agent(args) }) => Config::load(&args),
        Err(e) => {
            tracing::error!(err = %e, "khronos: failed to re-parse CLI args on reload");
            return;
        }
    };

    match parsed {
        Ok(config) => {
            let default_directive = format!("{0},khronos={0}", config.log_level);
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive));
            if let Err(e) = filter_handle.reload(filter) {
                tracing::error!(err = %e, "khronos: failed to apply reloaded log filter");
            }
        }
        Err(e) => tracing::error!(err = %e, "khronos: config reload failed"),
    }
}
