use std::env;
use std::net::{IpAddr, Ipv4Addr};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

/// Top-level CLI surface. A single `agent` subcommand.
#[derive(Debug, Parser)]
#[command(name = "khronos", about = "Distributed cron-like job dispatcher")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator agent: scheduler, heartbeat, and RPC surface.
    Agent(AgentArgs),
}

#[derive(Debug, Parser)]
pub struct AgentArgs {
    /// Selects which config file environment-specific defaults to layer on
    /// top of env vars (local, dev, sit, prod).
    #[arg(short = 'e', long, default_value = "local")]
    pub env: String,

    #[arg(long)]
    pub bind_ip: Option<String>,
    #[arg(long)]
    pub bind_port: Option<u16>,
    #[arg(long)]
    pub rpc_port: Option<u16>,
    #[arg(long)]
    pub node_name: Option<String>,

    #[arg(long)]
    pub backend: Option<String>,
    #[arg(long)]
    pub backend_machines: Option<String>,
    #[arg(long)]
    pub keyspace: Option<String>,

    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub log_path: Option<String>,
}

/// Assembled runtime configuration: CLI flags override environment
/// variables, which override the defaults below.
#[derive(Debug, Clone)]
pub struct Config {
    pub runmode: String,
    pub node_name: String,
    pub log_level: String,
    /// `"stdout"` or a directory path. This core only wires stdout output.
    pub log_path: String,

    pub bind_ip: IpAddr,
    pub bind_port: u16,
    pub rpc_port: u16,

    pub backend: String,
    pub backend_machines: Vec<String>,
    pub keyspace: String,

    /// Accepted for interface parity with deployments that configure mail
    /// alerting; this agent never sends mail itself.
    pub mail_host: String,
    pub mail_port: u16,
    pub mail_username: String,
    pub mail_password: String,
    pub mail_from: String,
    pub mail_payload: String,
    pub mail_subject_prefix: String,
}

const VALID_ENVS: &[&str] = &["local", "dev", "sit", "prod"];
const VALID_BACKENDS: &[&str] = &["etcd", "etcdv3", "consul", "zk", "redis"];

impl Config {
    /// Builds a `Config` from `.env` + process environment, then applies
    /// any CLI overrides from `args`. Config errors are fatal at startup.
    pub fn load(args: &AgentArgs) -> Result<Self> {
        let _ = dotenv();

        let runmode = args.env.clone();
        anyhow::ensure!(
            VALID_ENVS.contains(&runmode.as_str()),
            "env must be one of {VALID_ENVS:?}, got {runmode:?}"
        );

        let backend = args
            .backend
            .clone()
            .or_else(|| env::var("KHRONOS_BACKEND").ok())
            .unwrap_or_else(|| "etcd".to_string());
        anyhow::ensure!(
            VALID_BACKENDS.contains(&backend.as_str()),
            "backend must be one of {VALID_BACKENDS:?}, got {backend:?}"
        );

        let bind_ip = args
            .bind_ip
            .clone()
            .or_else(|| env::var("KHRONOS_BIND_IP").ok())
            .unwrap_or_else(|| "0.0.0.0".to_string())
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        Ok(Config {
            runmode,
            node_name: args
                .node_name
                .clone()
                .or_else(|| env::var("KHRONOS_NODE_NAME").ok())
                .unwrap_or_else(|| "khronos01".to_string()),
            log_level: args
                .log_level
                .clone()
                .or_else(|| env::var("KHRONOS_LOG_LEVEL").ok())
                .unwrap_or_else(|| "info".to_string()),
            log_path: args
                .log_path
                .clone()
                .or_else(|| env::var("KHRONOS_LOG_PATH").ok())
                .unwrap_or_else(|| "stdout".to_string()),

            bind_ip,
            bind_port: env_or_arg_port(args.bind_port, "KHRONOS_BIND_PORT", 8080)?,
            rpc_port: env_or_arg_port(args.rpc_port, "KHRONOS_RPC_PORT", 10105)?,

            backend,
            backend_machines: args
                .backend_machines
                .clone()
                .or_else(|| env::var("KHRONOS_BACKEND_MACHINES").ok())
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            keyspace: args
                .keyspace
                .clone()
                .or_else(|| env::var("KHRONOS_KEYSPACE").ok())
                .unwrap_or_else(|| "khronos".to_string()),

            mail_host: env::var("KHRONOS_MAIL_HOST").unwrap_or_default(),
            mail_port: env::var("KHRONOS_MAIL_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            mail_username: env::var("KHRONOS_MAIL_USERNAME").unwrap_or_default(),
            mail_password: env::var("KHRONOS_MAIL_PASSWORD").unwrap_or_default(),
            mail_from: env::var("KHRONOS_MAIL_FROM").unwrap_or_default(),
            mail_payload: env::var("KHRONOS_MAIL_PAYLOAD").unwrap_or_default(),
            mail_subject_prefix: env::var("KHRONOS_MAIL_SUBJECT_PREFIX").unwrap_or_default(),
        })
    }

    pub fn rpc_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.bind_ip, self.rpc_port)
    }
}

fn env_or_arg_port(arg: Option<u16>, var: &str, default: u16) -> Result<u16> {
    if let Some(p) = arg {
        return Ok(p);
    }
    match env::var(var) {
        Ok(s) => s.parse().with_context(|| format!("{var} must be a valid port number")),
        Err(_) => Ok(default),
    }
}
