use http::{HeaderValue, Request};
use tower::{Layer, Service};

use crate::trace::{TRACEPARENT_HEADER, TRACESTATE_HEADER, TraceInfo, TraceState, context};
use crate::*;

/// Derives and injects outbound trace context around client calls: mints the
/// next hop's identity, rewrites `traceparent`/`tracestate`, and binds the
/// derived context for the life of the call so nested work (including the
/// balancer pick) observes it.
#[derive(Debug, Clone, Default)]
pub struct ClientTraceLayer;

impl<S> Layer<S> for ClientTraceLayer {
	type Service = ClientTrace<S>;

	fn layer(&self, inner: S) -> Self::Service {
		ClientTrace { inner }
	}
}

#[derive(Debug, Clone)]
pub struct ClientTrace<S> {
	inner: S,
}

impl<S, B> Service<Request<B>> for ClientTrace<S>
where
	S: Service<Request<B>> + Clone + Send + 'static,
	S::Future: Send + 'static,
	S::Response: Send + 'static,
	S::Error: Send + 'static,
	B: Send + 'static,
{
	type Response = S::Response;
	type Error = S::Error;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, mut req: Request<B>) -> Self::Future {
		let clone = self.inner.clone();
		let mut inner = std::mem::replace(&mut self.inner, clone);

		Box::pin(async move {
			// No ambient context means this call starts its own trace in the
			// default lane.
			let current = context::current().unwrap_or_else(|| TraceInfo::root(Strng::default()));
			let derived = current.derived();

			if let Ok(v) = HeaderValue::from_str(&format!("{:?}", derived.traceparent())) {
				req.headers_mut().insert(TRACEPARENT_HEADER, v);
			}
			// A tracestate the caller already set wins over the request
			// scope's inbound one; either way foreign members survive.
			let base = req
				.headers()
				.get(TRACESTATE_HEADER)
				.and_then(|v| v.to_str().ok())
				.map(TraceState::parse)
				.unwrap_or_else(context::inbound_state);
			let outbound = base.with_lane(&derived.lane);
			if outbound.is_empty() {
				req.headers_mut().remove(TRACESTATE_HEADER);
			} else if let Ok(v) = HeaderValue::from_str(&outbound.to_string()) {
				req.headers_mut().insert(TRACESTATE_HEADER, v);
			}

			// Headers are final before dispatch; everything beneath the
			// call, including the balancer, sees the derived context.
			context::scope_with_state(derived, base, inner.call(req)).await
		})
	}
}
