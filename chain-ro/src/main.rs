#![warn(clippy::all, clippy::pedantic, clippy::cargo, clippy::nursery)]

mod app;
mod config;
mod error;
mod healthcheck;
mod logging;
mod prometheus;
mod rpc_server;
mod shutdown;
mod token;

use std::sync::Arc;

use anyhow::{Context as _, Result as AnyResult};
use config::{Command, Options, WeightCommand};
use dotenv::dotenv;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::HttpClientBuilder;
use jsonrpsee::rpc_params;
use jsonrpsee::server::ServerBuilder;
use structopt::StructOpt;
use tokio::{runtime, spawn, sync::oneshot};
use tracing::info;

use crate::app::App;
use crate::rpc_server::{AdminApiImpl, AdminApiServer as _, ChainRoApiImpl, ChainRoApiServer as _};
use crate::token::AdminToken;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    env!("COMMIT_SHA"),
    " ",
    env!("COMMIT_DATE"),
    "\n",
    env!("TARGET"),
    " ",
    env!("BUILD_DATE"),
);

fn main() -> AnyResult<()> {
    dotenv().ok();

    let matches = Options::clap().long_version(VERSION).get_matches();
    let mut options = Options::from_clap(&matches);
    options.log.init()?;

    runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("error creating Tokio runtime")?
        .block_on(async move {
            match options.command {
                Command::Run(run) => run_command(options.prometheus, run).await,
                Command::Weight(weight) => weight_command(weight).await,
            }
        })?;

    info!("program terminating normally");
    Ok(())
}

async fn run_command(prometheus_options: prometheus::Options, run: config::RunOptions) -> AnyResult<()> {
    if let Some(endpoint) = &run.jaeger.jaeger_endpoint {
        info!(endpoint, service = %run.jaeger.jaeger_service_name, "tracing export requested but not wired in this build");
    }

    spawn(prometheus::main(prometheus_options));

    let admin_token = Arc::new(AdminToken::bootstrap().context("minting admin token")?);

    let app = App::connect(run.nodes).await.context("failed to connect to any configured upstream")?;
    app.start();

    let public_server = ServerBuilder::default()
        .max_request_body_size(run.max_req_size)
        .build(run.listen)
        .await
        .context("binding public RPC listener")?;
    let public_handle = public_server.start(ChainRoApiImpl::new(app.clone()).into_rpc());
    info!(listen = %run.listen, "public JSON-RPC surface listening");

    let admin_server = ServerBuilder::default()
        .build(run.admin_listen)
        .await
        .context("binding admin RPC listener")?;
    let admin_handle = admin_server.start(AdminApiImpl::new(app.clone(), admin_token).into_rpc());
    info!(listen = %run.admin_listen, "admin JSON-RPC surface listening");

    spawn(healthcheck::main(app.clone()));

    let (send, shutdown) = oneshot::channel();
    spawn(async {
        shutdown::signal_shutdown().await.unwrap();
        let _ = send.send(());
    });

    let _ = shutdown.await;
    app.stop().await;
    let _ = public_handle.stop();
    let _ = admin_handle.stop();
    Ok(())
}

async fn weight_command(weight: config::WeightOptions) -> AnyResult<()> {
    let token = crate::token::read_token().context("no admin token on disk; is chain-ro running?")?;
    let client = HttpClientBuilder::default()
        .build(&weight.admin_endpoint)
        .context("building admin client")?;

    match weight.command {
        WeightCommand::List => {
            let weights: std::collections::HashMap<String, u32> =
                client.request("ListWeight", rpc_params![token]).await?;
            for (address, w) in weights {
                println!("{address}\t{w}");
            }
        }
        WeightCommand::Set { address, weight } => {
            client
                .request::<(), _>("SetWeight", rpc_params![token, address, weight])
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub mod test {
    use tracing::{error, info, warn};
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_with_log_output() {
        error!("logged on the error level");
        assert!(logs_contain("logged on the error level"));
    }

    #[tokio::test]
    #[traced_test]
    #[allow(clippy::semicolon_if_nothing_returned)] // False positive
    async fn async_test_with_log() {
        info!("This is being logged on the info level");

        tokio::spawn(async {
            warn!("This is being logged on the warn level from a spawned task");
        })
        .await
        .unwrap();

        assert!(logs_contain("logged on the info level"));
        assert!(logs_contain("logged on the warn level"));
        assert!(!logs_contain("logged on the error level"));
    }
}

