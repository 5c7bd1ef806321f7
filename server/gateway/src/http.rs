//! `GET /voice/ice-config` and `GET /voice/participants`, served
//! alongside the signalling socket. Grounded on `concord_metrics::http`'s
//! hyper/TokioIo connection-serving shape.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use concord_metrics::gateway::GatewayMetrics;
use concord_voice::ice::TurnSettings;
use http_body_util::Full;
use hyper::{body::Bytes, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::info;

use crate::state::GatewayState;

pub struct HttpSurface {
    state: Arc<GatewayState>,
    turn: TurnSettings,
    metrics: Arc<GatewayMetrics>,
}

impl HttpSurface {
    pub fn new(state: Arc<GatewayState>, turn: TurnSettings, metrics: Arc<GatewayMetrics>) -> Self {
        Self { state, turn, metrics }
    }

    pub async fn serve(self, listen: &str) -> Result<()> {
        let addr: SocketAddr = listen.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("voice http surface listening on http://{addr}");

        let shared = Arc::new(self);
        loop {
            let (stream, _) = listener.accept().await?;
            let shared = shared.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = hyper::service::service_fn(move |req| {
                    let shared = shared.clone();
                    async move { shared.handle(req).await }
                });
                let _ = hyper::server::conn::http1::Builder::new().serve_connection(io, service).await;
            });
        }
    }

    async fn handle(&self, req: Request<hyper::body::Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let query = parse_query(req.uri().query().unwrap_or(""));
        let response = match req.uri().path() {
            "/voice/ice-config" => self.ice_config(&query),
            "/voice/participants" => self.participants(&query),
            _ => not_found(),
        };
        Ok(response)
    }

    fn ice_config(&self, query: &HashMap<String, String>) -> Response<Full<Bytes>> {
        let user_id = query.get("user").cloned().unwrap_or_default();
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        match concord_voice::build_config(&self.turn, &user_id, "", now) {
            Ok(cfg) => {
                self.metrics.ice_config_issued();
                json_response(200, &serde_json::to_value(&cfg).unwrap_or(serde_json::Value::Null))
            }
            Err(e) => json_response(500, &serde_json::json!({"error": e.to_string()})),
        }
    }

    fn participants(&self, query: &HashMap<String, String>) -> Response<Full<Bytes>> {
        let server_id = query.get("server").cloned().unwrap_or_default();
        let channel_id = query.get("channel").cloned().unwrap_or_default();
        let participants = self.state.participants(&server_id, &channel_id);
        json_response(200, &serde_json::json!({ "participants": participants }))
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn json_response(status: u16, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn not_found() -> Response<Full<Bytes>> {
    Response::builder().status(404).body(Full::new(Bytes::from("not found"))).unwrap()
}
