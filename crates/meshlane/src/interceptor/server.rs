use http::{HeaderValue, Request, Response};
use tower::{Layer, Service};

use super::{X_SPAN_ID, X_TRACE_ID, skip_tracing};
use crate::trace::{TRACEPARENT_HEADER, TRACESTATE_HEADER, TraceInfo, TraceParent, TraceState, context};
use crate::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
	Http,
	Rpc,
}

/// Installs inbound trace context around server calls: parses the inbound
/// `traceparent`/`tracestate`, mints the server span, binds the carrier for
/// the life of the call, and stamps the response.
#[derive(Debug, Clone)]
pub struct ServerTraceLayer {
	mode: Mode,
}

impl ServerTraceLayer {
	/// HTTP ingress: the skip list applies and responses carry the
	/// compatibility headers.
	pub fn http() -> Self {
		ServerTraceLayer { mode: Mode::Http }
	}

	/// RPC server ingress: every call is traced, no compatibility headers.
	pub fn rpc() -> Self {
		ServerTraceLayer { mode: Mode::Rpc }
	}
}

impl<S> Layer<S> for ServerTraceLayer {
	type Service = ServerTrace<S>;

	fn layer(&self, inner: S) -> Self::Service {
		ServerTrace {
			inner,
			mode: self.mode,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ServerTrace<S> {
	inner: S,
	mode: Mode,
}

impl<S, B, RB> Service<Request<B>> for ServerTrace<S>
where
	S: Service<Request<B>, Response = Response<RB>> + Clone + Send + 'static,
	S::Future: Send + 'static,
	S::Error: Send + 'static,
	B: Send + 'static,
	RB: Send + 'static,
{
	type Response = Response<RB>;
	type Error = S::Error;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, req: Request<B>) -> Self::Future {
		let clone = self.inner.clone();
		// The clone may not have been polled ready; keep using the one that
		// was and hand the fresh one to the next call.
		let mut inner = std::mem::replace(&mut self.inner, clone);
		let mode = self.mode;

		if mode == Mode::Http && skip_tracing(req.uri().path()) {
			return Box::pin(async move { inner.call(req).await });
		}

		Box::pin(async move {
			let upstream = req
				.headers()
				.get(TRACEPARENT_HEADER)
				.and_then(|v| v.to_str().ok())
				.and_then(|v| TraceParent::try_from(v).ok());
			let raw_state = req
				.headers()
				.get(TRACESTATE_HEADER)
				.and_then(|v| v.to_str().ok())
				.map(|v| v.to_owned());
			let state = raw_state
				.as_deref()
				.map(TraceState::parse)
				.unwrap_or_default();
			let lane = state.lane().unwrap_or_default();
			// An unparseable or absent traceparent means a fresh root; the
			// request still gets full context downstream.
			let info = match &upstream {
				Some(tp) => TraceInfo::from_remote(tp, lane),
				None => TraceInfo::root(lane),
			};

			let server_span = info.traceparent();
			let trace_id = info.trace_id_hex();
			let span_id = info.span_id_hex();
			let start = Instant::now();
			let result = context::scope_with_state(info, state, inner.call(req)).await;
			match result {
				Ok(mut resp) => {
					let headers = resp.headers_mut();
					// Replace, never append: intermediaries must see exactly
					// one canonical value.
					if let Ok(v) = HeaderValue::from_str(&format!("{server_span:?}")) {
						headers.insert(TRACEPARENT_HEADER, v);
					}
					if let Some(raw) = raw_state
						&& let Ok(v) = HeaderValue::from_str(&raw)
					{
						headers.insert(TRACESTATE_HEADER, v);
					}
					if mode == Mode::Http {
						if let Ok(v) = HeaderValue::from_str(&trace_id) {
							headers.insert(X_TRACE_ID, v);
						}
						if let Ok(v) = HeaderValue::from_str(&span_id) {
							headers.insert(X_SPAN_ID, v);
						}
					}
					debug!(
						trace_id = %trace_id,
						span_id = %span_id,
						duration = ?start.elapsed(),
						"request complete"
					);
					Ok(resp)
				},
				Err(e) => {
					warn!(
						trace_id = %trace_id,
						duration = ?start.elapsed(),
						"request failed"
					);
					Err(e)
				},
			}
		})
	}
}
