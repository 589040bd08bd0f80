//! The ambient carrier: binds a [TraceInfo] (and the inbound tracestate) to
//! the current task scope so egress interceptors and the balancer observe the
//! value installed at ingress, no matter which stack frame they run in.

use super::{TraceInfo, TraceState};
use crate::*;

tokio::task_local! {
	static TRACE_INFO: TraceInfo;
	static INBOUND_STATE: TraceState;
}

/// Binds `info` as the ambient trace context for `fut` and mirrors the four
/// context keys into the logging span. Both are restored when the future
/// completes, fails, or is dropped.
pub async fn scope<F: Future>(info: TraceInfo, fut: F) -> F::Output {
	scope_with_state(info, TraceState::default(), fut).await
}

/// Like [scope], also carrying the inbound `tracestate` so egress can
/// preserve foreign members.
pub async fn scope_with_state<F: Future>(info: TraceInfo, state: TraceState, fut: F) -> F::Output {
	let span = info.span();
	TRACE_INFO
		.scope(info, INBOUND_STATE.scope(state, fut.instrument(span)))
		.await
}

/// The TraceInfo of the current request scope, if any.
pub fn current() -> Option<TraceInfo> {
	TRACE_INFO.try_with(|t| t.clone()).ok()
}

/// The lane of the current request scope; empty is the default lane.
pub fn current_lane() -> Strng {
	TRACE_INFO
		.try_with(|t| t.lane.clone())
		.unwrap_or_default()
}

/// The tracestate that arrived with the current request, if any.
pub fn inbound_state() -> TraceState {
	INBOUND_STATE.try_with(|s| s.clone()).unwrap_or_default()
}

/// Task locals do not follow values into `tokio::spawn`. Wrap spawned work
/// with this to inherit the caller's context; the capture happens at call
/// time, not at poll time.
pub fn propagate<F: Future>(fut: F) -> impl Future<Output = F::Output> {
	let ctx = current().map(|info| (info, inbound_state()));
	async move {
		match ctx {
			Some((info, state)) => scope_with_state(info, state, fut).await,
			None => fut.await,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn scope_installs_and_restores() {
		assert_eq!(current(), None);
		let info = TraceInfo::root(strng::new("canary"));
		let seen = scope(info.clone(), async { current() }).await;
		assert_eq!(seen, Some(info));
		assert_eq!(current(), None);
		assert_eq!(current_lane(), "");
	}

	#[tokio::test]
	async fn nested_scopes_restore_outer() {
		let outer = TraceInfo::root(strng::new("a"));
		let inner = TraceInfo::root(strng::new("b"));
		scope(outer.clone(), async {
			assert_eq!(current_lane(), "a");
			scope(inner, async {
				assert_eq!(current_lane(), "b");
			})
			.await;
			assert_eq!(current_lane(), "a");
			assert_eq!(current(), Some(outer));
		})
		.await;
	}

	#[tokio::test]
	async fn restores_when_future_fails() {
		let info = TraceInfo::root(strng::new("x"));
		let res: Result<(), &str> = scope(info, async { Err("boom") }).await;
		assert!(res.is_err());
		assert_eq!(current(), None);
	}

	#[tokio::test]
	async fn propagate_crosses_spawn() {
		let info = TraceInfo::root(strng::new("canary"));
		let lane = scope(info, async {
			tokio::spawn(propagate(async { current_lane() }))
				.await
				.unwrap()
		})
		.await;
		assert_eq!(lane, "canary");
	}

	#[tokio::test]
	async fn spawn_without_propagate_sees_nothing() {
		let info = TraceInfo::root(strng::new("canary"));
		let seen = scope(info, async { tokio::spawn(async { current() }).await.unwrap() }).await;
		assert_eq!(seen, None);
	}

	#[tokio::test]
	async fn inbound_state_follows_scope() {
		let info = TraceInfo::root(Strng::default());
		let state = TraceState::parse("vendor=x,ctx=lane:gray");
		let seen = scope_with_state(info, state.clone(), async { inbound_state() }).await;
		assert_eq!(seen, state);
		assert!(inbound_state().is_empty());
	}
}
