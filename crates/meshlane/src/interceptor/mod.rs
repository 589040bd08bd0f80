//! Tower middleware moving trace state between wire headers and the ambient
//! carrier: server-side ingress (HTTP and RPC) and client-side egress.

mod client;
mod server;

pub use client::{ClientTrace, ClientTraceLayer};
pub use server::{ServerTrace, ServerTraceLayer};

pub(crate) const X_TRACE_ID: &str = "x-trace-id";
pub(crate) const X_SPAN_ID: &str = "x-span-id";

/// Paths that never get trace context: probes and static asset shovels.
const SKIP_EXACT: &[&str] = &["/actuator/health", "/actuator/info"];
const SKIP_PREFIX: &[&str] = &[
	"/favicon",
	"/assets/",
	"/static/",
	"/public/",
	"/webjars/",
	"/css/",
	"/js/",
	"/images/",
	"/swagger",
	"/v3/api-docs",
];

pub(crate) fn skip_tracing(path: &str) -> bool {
	SKIP_EXACT.iter().any(|p| path == *p) || SKIP_PREFIX.iter().any(|p| path.starts_with(p))
}

#[cfg(test)]
#[path = "interceptor_tests.rs"]
mod tests;
