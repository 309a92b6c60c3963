#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};

#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn mark_not_ready(&self) {
		self.ready.store(false, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub(crate) fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
	*resp.status_mut() = status;
	resp
}

/// Liveness and readiness endpoints.
pub(crate) fn handle_health(method: &Method, path: &str, state: &HealthState) -> Response<Full<Bytes>> {
	if method != Method::GET {
		return text_response(StatusCode::METHOD_NOT_ALLOWED, "");
	}

	match path {
		"/" => text_response(StatusCode::OK, "OK"),
		"/healthz" => text_response(StatusCode::OK, "ok"),
		"/readyz" => {
			if state.is_ready() {
				text_response(StatusCode::OK, "ready")
			} else {
				text_response(StatusCode::SERVICE_UNAVAILABLE, "not-ready")
			}
		}
		_ => text_response(StatusCode::NOT_FOUND, ""),
	}
}
