use std::net::SocketAddr;

use chain_ro_types::UpstreamConfig;
use structopt::StructOpt;

/// `chain-ro run --listen <addr> --node token:url [--node ...] --auth
/// token:url --rate-limit-redis <url> --version v1 --max-req-size <bytes>
/// [jaeger flags]`.
#[derive(Debug, StructOpt)]
pub struct RunOptions {
    /// Address the public JSON-RPC surface listens on.
    #[structopt(long, env = "LISTEN", default_value = "0.0.0.0:1234")]
    pub listen: SocketAddr,

    /// Address the admin JSON-RPC surface listens on.
    #[structopt(long, env = "ADMIN_LISTEN", default_value = "127.0.0.1:1235")]
    pub admin_listen: SocketAddr,

    /// One configured upstream, `token:url`. Repeatable; at least one is
    /// required.
    #[structopt(long = "node", env = "NODES", required = true)]
    pub nodes: Vec<UpstreamConfig>,

    /// Remote auth endpoint (`token:url`), out of scope for this repo:
    /// carried as a CLI flag for compatibility but not wired to
    /// anything.
    #[structopt(long)]
    pub auth: Option<UpstreamConfig>,

    /// Redis connection string for a rate-limiting middleware, out of
    /// scope: carried, not wired.
    #[structopt(long)]
    pub rate_limit_redis: Option<String>,

    /// Upstream API version tag used when none is given per-node.
    #[structopt(long, default_value = "v1")]
    pub version: String,

    /// Maximum accepted request body size, in bytes.
    #[structopt(long, default_value = "10485760")]
    pub max_req_size: u32,

    #[structopt(flatten)]
    pub jaeger: JaegerOptions,
}

/// Mirrors an OpenCensus/Jaeger flag surface kept around for operator
/// familiarity; a no-op here unless a collector endpoint is actually
/// supplied.
#[derive(Debug, StructOpt)]
pub struct JaegerOptions {
    #[structopt(long)]
    pub jaeger_endpoint: Option<String>,

    #[structopt(long, default_value = "chain-ro")]
    pub jaeger_service_name: String,
}

#[derive(Debug, StructOpt)]
pub enum WeightCommand {
    /// Lists the weight and priority of every registered upstream.
    List,
    /// Sets one upstream's weight (0 blocks it entirely).
    Set {
        address: String,
        weight: u32,
    },
}

/// `chain-ro weight {list|set addr w}`, driving the admin API.
#[derive(Debug, StructOpt)]
pub struct WeightOptions {
    /// Admin JSON-RPC endpoint to call.
    #[structopt(long, env = "ADMIN_ENDPOINT", default_value = "http://127.0.0.1:1235")]
    pub admin_endpoint: String,

    #[structopt(subcommand)]
    pub command: WeightCommand,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    Run(RunOptions),
    Weight(WeightOptions),
}

#[derive(Debug, StructOpt)]
#[structopt(name = "chain-ro")]
pub struct Options {
    #[structopt(flatten)]
    pub log: crate::logging::LogOptions,

    #[structopt(flatten)]
    pub prometheus: crate::prometheus::Options,

    #[structopt(subcommand)]
    pub command: Command,
}
