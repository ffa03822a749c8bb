use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result as AnyResult};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use tracing::info;

use crate::app::App;

const LISTEN: &str = "127.0.0.1:1236";

/// 200 once the coordinator holds a head, 503 otherwise.
pub async fn main(app: Arc<App>) -> AnyResult<()> {
    let make_svc = make_service_fn(move |_conn| {
        let app = app.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| {
                let app = app.clone();
                async move {
                    let body = if app.coordinator.has_head().await {
                        Response::builder().status(200).body(Body::from("ok"))
                    } else {
                        Response::builder().status(503).body(Body::from("no head yet"))
                    };
                    Ok::<_, Infallible>(body.unwrap())
                }
            }))
        }
    });
    let addr: SocketAddr = LISTEN.parse().expect("LISTEN is a valid socket address");
    info!(listen = LISTEN, "serving healthcheck");
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("error serving healthcheck")?;
    Ok(())
}
