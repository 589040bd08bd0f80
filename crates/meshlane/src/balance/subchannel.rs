use std::fmt;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::resolve::Endpoint;
use crate::*;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Observable transport state of one subchannel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
	Idle,
	Connecting,
	Ready,
	TransientFailure,
	Shutdown,
}

impl fmt::Display for Connectivity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Connectivity::Idle => "idle",
			Connectivity::Connecting => "connecting",
			Connectivity::Ready => "ready",
			Connectivity::TransientFailure => "transient_failure",
			Connectivity::Shutdown => "shutdown",
		};
		write!(f, "{s}")
	}
}

/// Capability for establishing transports. The balancer is generic over it
/// so RPC embeddings and tests plug in their own runtime.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
	async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<Box<dyn Connection>>;
}

/// A live transport. `closed` resolves when the peer goes away.
#[async_trait]
pub trait Connection: Send + 'static {
	async fn closed(&mut self);
}

/// Plain TCP keepalive transport, the default runtime.
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
	async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<Box<dyn Connection>> {
		let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
		Ok(Box::new(TcpConnection { stream }))
	}
}

struct TcpConnection {
	stream: TcpStream,
}

#[async_trait]
impl Connection for TcpConnection {
	async fn closed(&mut self) {
		// Drain until EOF or error; either way the transport is gone.
		let mut buf = [0u8; 512];
		loop {
			match self.stream.read(&mut buf).await {
				Ok(0) | Err(_) => return,
				Ok(_) => {},
			}
		}
	}
}

/// A persistent transport handle to one endpoint. The balancer owns it; the
/// driver task publishes state through a watch and takes commands through a
/// channel, so neither side holds a reference into the other.
#[derive(Debug)]
pub struct Subchannel {
	endpoint: Endpoint,
	state: watch::Receiver<Connectivity>,
	commands: mpsc::UnboundedSender<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
	Connect,
	Shutdown,
}

impl Subchannel {
	pub fn spawn(endpoint: Endpoint, connector: Arc<dyn Connector>) -> Subchannel {
		let (state_tx, state_rx) = watch::channel(Connectivity::Idle);
		let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
		let driver = Driver {
			endpoint: endpoint.clone(),
			connector,
			state: state_tx,
			commands: cmd_rx,
		};
		tokio::spawn(driver.run());
		Subchannel {
			endpoint,
			state: state_rx,
			commands: cmd_tx,
		}
	}

	pub fn endpoint(&self) -> &Endpoint {
		&self.endpoint
	}

	pub fn state(&self) -> Connectivity {
		*self.state.borrow()
	}

	pub fn watch(&self) -> watch::Receiver<Connectivity> {
		self.state.clone()
	}

	pub fn request_connect(&self) {
		let _ = self.commands.send(Command::Connect);
	}

	pub fn shutdown(&self) {
		let _ = self.commands.send(Command::Shutdown);
	}
}

impl Drop for Subchannel {
	fn drop(&mut self) {
		let _ = self.commands.send(Command::Shutdown);
	}
}

struct Driver {
	endpoint: Endpoint,
	connector: Arc<dyn Connector>,
	state: watch::Sender<Connectivity>,
	commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
	async fn run(mut self) {
		'idle: loop {
			self.set(Connectivity::Idle);
			// Stay idle until someone asks for a connection.
			loop {
				match self.commands.recv().await {
					Some(Command::Connect) => break,
					Some(Command::Shutdown) | None => break 'idle,
				}
			}
			let mut backoff = BACKOFF_BASE;
			loop {
				self.set(Connectivity::Connecting);
				match self.connector.connect(&self.endpoint).await {
					Ok(mut conn) => {
						debug!(endpoint = %self.endpoint, "connected");
						backoff = BACKOFF_BASE;
						self.set(Connectivity::Ready);
						loop {
							tokio::select! {
								_ = conn.closed() => {
									debug!(endpoint = %self.endpoint, "transport closed");
									continue 'idle;
								},
								cmd = self.commands.recv() => match cmd {
									// Already connected; nothing to do.
									Some(Command::Connect) => {},
									Some(Command::Shutdown) | None => break 'idle,
								},
							}
						}
					},
					Err(e) => {
						warn!(endpoint = %self.endpoint, err = %e, "connect failed");
						self.set(Connectivity::TransientFailure);
						let delay = jitter(backoff);
						backoff = std::cmp::min(backoff * 2, BACKOFF_MAX);
						tokio::select! {
							_ = tokio::time::sleep(delay) => {},
							cmd = self.commands.recv() => match cmd {
								// Explicit request short-circuits the backoff.
								Some(Command::Connect) => {},
								Some(Command::Shutdown) | None => break 'idle,
							},
						}
					},
				}
			}
		}
		self.set(Connectivity::Shutdown);
	}

	fn set(&self, next: Connectivity) {
		self.state.send_if_modified(|s| {
			if *s == next {
				false
			} else {
				*s = next;
				true
			}
		});
	}
}

fn jitter(base: Duration) -> Duration {
	base.mul_f64(rand::rng().random_range(0.8..1.2))
}
