// ===============================
// src/http.rs
// ===============================
//
// hyper 0.14 server:
//   GET /metrics                 -> prometheus text
//   GET /groups/{id}/balances    -> JSON settlement instructions
//   anything else                -> 404
//
// The metrics-only listener passes no service, so balances routes 404 there.
//
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tracing::{error, info, warn};

use crate::cache::CacheBackend;
use crate::domain::GroupId;
use crate::metrics::encode_metrics;
use crate::service::BalanceService;
use crate::store::LedgerStore;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";
const JSON: &str = "application/json";

fn reply(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut resp = Response::new(body.into());
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn not_found() -> Response<Body> {
    reply(StatusCode::NOT_FOUND, "text/plain", "not found\n")
}

/// `/groups/{id}/balances` -> `{id}`
fn balances_path(path: &str) -> Option<&str> {
    let id = path.strip_prefix("/groups/")?.strip_suffix("/balances")?;
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

pub async fn route<S: LedgerStore, B: CacheBackend>(
    req: Request<Body>,
    svc: Option<&BalanceService<S, B>>,
) -> Response<Body> {
    if req.method() != Method::GET {
        return not_found();
    }
    let path = req.uri().path();
    if path == "/metrics" {
        return reply(StatusCode::OK, PROMETHEUS_TEXT, encode_metrics());
    }
    let (Some(svc), Some(id)) = (svc, balances_path(path)) else {
        return not_found();
    };

    let group = GroupId::new(id);
    match svc.balances(&group).await {
        Ok(plan) => match serde_json::to_vec(&plan) {
            Ok(body) => reply(StatusCode::OK, JSON, body),
            Err(e) => {
                error!(group = %group, error = %e, "http: encode balances failed");
                reply(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "encode error\n")
            }
        },
        Err(e) => {
            warn!(group = %group, error = %e, "http: balances failed");
            reply(StatusCode::SERVICE_UNAVAILABLE, "text/plain", format!("{e}\n"))
        }
    }
}

pub async fn serve<S, B>(port: u16, svc: Option<Arc<BalanceService<S, B>>>)
where
    S: LedgerStore + 'static,
    B: CacheBackend + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make = make_service_fn(move |_conn| {
        let svc = svc.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let svc = svc.clone();
                async move { Ok::<_, Infallible>(route(req, svc.as_deref()).await) }
            }))
        }
    });

    let builder = match Server::try_bind(&addr) {
        Ok(b) => b,
        Err(e) => {
            error!(%addr, error = %e, "http: bind failed");
            return;
        }
    };
    info!(%addr, "http: listening");
    if let Err(e) = builder.serve(make).await {
        error!(%addr, error = %e, "http: server stopped");
    }
}
