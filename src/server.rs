// ===============================
// src/server.rs (chat API, thin plumbing)
// ===============================
//
// POST /chat      {session_id?, shop_id, user_message} -> Reply
// GET  /market    -> snapshot harga + hitung mundur refresh
// GET  /portfolio ?session_id=... -> ringkasan wallet/holdings/PnL
// POST /reset     {session_id?} -> kembali ke seed
// GET  /          -> liveness
//
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::engine::{Engine, EngineError};

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default = "default_session")]
    session_id: String,
    shop_id: u32,
    user_message: String,
}

#[derive(Debug, Deserialize)]
struct ResetRequest {
    #[serde(default = "default_session")]
    session_id: String,
}

fn default_session() -> String {
    "default".to_string()
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}

async fn read_json<T: for<'de> Deserialize<'de>>(req: Request<Body>) -> Result<T, Response<Body>> {
    let bytes = hyper::body::to_bytes(req.into_body()).await.map_err(|e| {
        error!(?e, "failed to read request body");
        json_response(StatusCode::BAD_REQUEST, json!({ "error": "unreadable body" }))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        json_response(StatusCode::BAD_REQUEST, json!({ "error": format!("bad request: {e}") }))
    })
}

async fn handle_chat(engine: Arc<Engine>, req: Request<Body>) -> Response<Body> {
    let chat: ChatRequest = match read_json(req).await {
        Ok(c) => c,
        Err(rsp) => return rsp,
    };
    match engine.evaluate_message(&chat.session_id, chat.shop_id, &chat.user_message).await {
        Ok(reply) => json_response(
            StatusCode::OK,
            serde_json::to_value(&reply).unwrap_or_default(),
        ),
        Err(EngineError::UnknownShop(id)) => json_response(
            StatusCode::BAD_REQUEST,
            json!({ "error": format!("invalid shop ID {id}") }),
        ),
    }
}

async fn handle_reset(engine: Arc<Engine>, req: Request<Body>) -> Response<Body> {
    let reset: ResetRequest = match read_json(req).await {
        Ok(r) => r,
        Err(rsp) => return rsp,
    };
    engine.reset_portfolio(&reset.session_id);
    json_response(StatusCode::OK, json!({ "status": "reset", "session_id": reset.session_id }))
}

async fn route(engine: Arc<Engine>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method().clone(), req.uri().path().to_string().as_str()) {
        (Method::GET, "/") => json_response(
            StatusCode::OK,
            json!({ "status": "ok", "service": "pasar_bot_rust" }),
        ),
        (Method::POST, "/chat") => handle_chat(engine, req).await,
        (Method::GET, "/market") => json_response(
            StatusCode::OK,
            serde_json::to_value(engine.market_snapshot()).unwrap_or_default(),
        ),
        (Method::GET, "/portfolio") => {
            let session_id =
                query_param(req.uri().query(), "session_id").unwrap_or_else(default_session);
            json_response(
                StatusCode::OK,
                serde_json::to_value(engine.portfolio_summary(&session_id)).unwrap_or_default(),
            )
        }
        (Method::POST, "/reset") => handle_reset(engine, req).await,
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
    };
    Ok(response)
}

pub async fn serve(engine: Arc<Engine>, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(move |_conn| {
        let engine = engine.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| route(engine.clone(), req))) }
    });
    info!(%addr, "chat API listening");
    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        error!(?e, "chat API server error");
    }
}
