use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::{Context as _, Result as AnyResult};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use prometheus::{Encoder, TextEncoder};
use structopt::StructOpt;
use tracing::info;

#[derive(Clone, Debug, StructOpt, PartialEq)]
pub struct Options {
    /// Address to serve Prometheus metrics on.
    #[structopt(long, env = "PROMETHEUS", default_value = "127.0.0.1:9998")]
    pub prometheus: SocketAddr,
}

async fn serve_metrics(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    Ok(Response::new(Body::from(buffer)))
}

pub async fn main(options: Options) -> AnyResult<()> {
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(serve_metrics)) });
    info!("Serving Prometheus metrics on {}", options.prometheus);
    Server::bind(&options.prometheus)
        .serve(make_svc)
        .await
        .context("Error serving Prometheus metrics")?;
    Ok(())
}
