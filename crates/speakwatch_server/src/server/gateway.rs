#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{debug, info, warn};

use crate::server::connection::serve_subscriber;
use crate::server::health::{HealthState, handle_health, text_response};
use crate::server::notifier::Notifier;

/// Websocket endpoint path.
pub const WS_PATH: &str = "/ws";

/// HTTP front door: health endpoints plus websocket upgrades for subscribers.
#[derive(Clone)]
pub struct Gateway {
	health: HealthState,
	notifier: Notifier,
	next_conn_id: Arc<AtomicU64>,
}

impl Gateway {
	pub fn new(health: HealthState, notifier: Notifier) -> Self {
		Self {
			health,
			notifier,
			next_conn_id: Arc::new(AtomicU64::new(1)),
		}
	}

	/// Accept connections until the listener fails.
	pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
		loop {
			let (stream, remote) = listener.accept().await?;
			let io = TokioIo::new(stream);
			let gateway = self.clone();

			tokio::spawn(async move {
				let service = service_fn(move |req| {
					let gateway = gateway.clone();
					async move { Ok::<_, hyper::Error>(gateway.route(req, remote)) }
				});

				if let Err(err) = http1::Builder::new().serve_connection(io, service).with_upgrades().await {
					debug!(%remote, error = %err, "http connection error");
				}
			});
		}
	}

	fn route(&self, req: Request<Incoming>, remote: SocketAddr) -> Response<Full<Bytes>> {
		if req.uri().path() == WS_PATH {
			return self.upgrade(req, remote);
		}
		handle_health(req.method(), req.uri().path(), &self.health)
	}

	fn upgrade(&self, mut req: Request<Incoming>, remote: SocketAddr) -> Response<Full<Bytes>> {
		if req.method() != Method::GET {
			return text_response(StatusCode::METHOD_NOT_ALLOWED, "");
		}

		let Some(key) = websocket_key(req.headers()) else {
			return text_response(StatusCode::BAD_REQUEST, "expected websocket upgrade");
		};

		let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) else {
			return text_response(StatusCode::INTERNAL_SERVER_ERROR, "");
		};

		let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
		let notifier = self.notifier.clone();
		let on_upgrade = hyper::upgrade::on(&mut req);

		tokio::spawn(async move {
			match on_upgrade.await {
				Ok(upgraded) => {
					info!(conn_id, %remote, "accepted websocket connection");
					let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
					serve_subscriber(conn_id, ws, notifier).await;
				}
				Err(e) => warn!(conn_id, %remote, error = %e, "websocket upgrade failed"),
			}
		});

		let mut resp = text_response(StatusCode::SWITCHING_PROTOCOLS, "");
		let headers = resp.headers_mut();
		headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
		headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
		headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
		resp
	}
}

/// The client's `Sec-WebSocket-Key` if the request is a valid v13 upgrade.
fn websocket_key(headers: &HeaderMap) -> Option<String> {
	let has_token = |name: header::HeaderName, token: &str| {
		headers
			.get_all(name)
			.iter()
			.filter_map(|v| v.to_str().ok())
			.flat_map(|v| v.split(','))
			.any(|v| v.trim().eq_ignore_ascii_case(token))
	};

	if !has_token(header::UPGRADE, "websocket") || !has_token(header::CONNECTION, "upgrade") {
		return None;
	}

	let version = headers.get(header::SEC_WEBSOCKET_VERSION)?.to_str().ok()?;
	if version.trim() != "13" {
		return None;
	}

	let key = headers.get(header::SEC_WEBSOCKET_KEY)?.to_str().ok()?.trim();
	if key.is_empty() {
		return None;
	}
	Some(key.to_string())
}
