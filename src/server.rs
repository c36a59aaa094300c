//! Read-only HTTP endpoints of the Envoy v1 discovery API.
//!
//! Handlers only read the cache, so a request never waits on a watcher.

use http::header::{self, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::error::Result;

fn json<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut resp = Response::new(Body::from(body));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            resp
        }
        Err(e) => {
            warn!(error = %e, "failed to encode response");
            status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn status(code: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = code;
    resp
}

/// Answers one request from the cache.
pub fn route(cache: &ResponseCache, req: &Request<Body>) -> Response<Body> {
    if req.method() != Method::GET {
        return status(StatusCode::METHOD_NOT_ALLOWED);
    }

    let segments: Vec<&str> = req
        .uri()
        .path()
        .trim_matches('/')
        .split('/')
        .collect();
    match segments.as_slice() {
        ["v1", "clusters", service_cluster, service_node] => {
            debug!(service_cluster, service_node, "cds request");
            json(cache.clusters().as_ref())
        }
        ["v1", "routes", route_config_name, service_cluster, service_node] => {
            debug!(route_config_name, service_cluster, service_node, "rds request");
            json(cache.routes().as_ref())
        }
        ["v1", "registration", service_name] => {
            debug!(service_name, "sds request");
            match cache.endpoints(service_name) {
                Some(resp) => json(resp.as_ref()),
                None => status(StatusCode::NOT_FOUND),
            }
        }
        _ => status(StatusCode::NOT_FOUND),
    }
}

/// Serves the cache on `addr` until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    cache: Arc<ResponseCache>,
    shutdown: CancellationToken,
) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let cache = cache.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let resp = route(&cache, &req);
                async move { Ok::<_, Infallible>(resp) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(%addr, "listening");
    server
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("http server stopped");
    Ok(())
}
