//! Accepts client connections and hands each one to its own session worker.

use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::net::TcpListener;

use crate::client::ClientLink;
use crate::error::ThreadError;
use crate::process::{Process, ProcessContext};

/// Session ids handed out to accepted connections.
static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Starts the worker that runs one session.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, name: String, job: Job) -> io::Result<()>;
}

/// One detached OS thread per session.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl WorkerSpawner for ThreadSpawner {
    fn spawn(&self, name: String, job: Job) -> io::Result<()> {
        thread::Builder::new().name(name).spawn(job).map(drop)
    }
}

/// Wraps an accepted socket in the client link the session talks through.
pub type ClientFactory =
    Arc<dyn Fn(std::net::TcpStream) -> io::Result<Box<dyn ClientLink>> + Send + Sync>;

pub struct Listener {
    listener: TcpListener,
    ctx: ProcessContext,
    spawner: Arc<dyn WorkerSpawner>,
    clients: ClientFactory,
}

impl Listener {
    pub async fn bind(
        addr: SocketAddr,
        ctx: ProcessContext,
        spawner: Arc<dyn WorkerSpawner>,
        clients: ClientFactory,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            ctx,
            spawner,
            clients,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the termination event is set. Failing to
    /// start a worker only drops that connection.
    pub async fn run(&self) -> io::Result<()> {
        let mut shutdown_rx = self.ctx.term.subscribe();
        if self.ctx.term.is_set() {
            return Ok(());
        }
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("listener received shutdown signal");
                    return Ok(());
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.dispatch(stream, peer),
                        Err(e) => error!("accept failed: {}", e),
                    }
                }
            }
        }
    }

    fn dispatch(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst);
        info!("connection from {} assigned session {}", peer, session_id);

        let client = match self.make_client(stream) {
            Ok(client) => client,
            Err(e) => {
                warn!("session {}: failed to set up client link: {}", session_id, e);
                return;
            }
        };

        let ctx = self.ctx.clone();
        let job: Job = Box::new(move || {
            let mut process = Process::new(session_id, ctx, client);
            // the process logs its own failure
            let _ = process.run();
        });
        if let Err(e) = self.spawner.spawn(format!("session-{}", session_id), job) {
            let class = ThreadError::classify(&e);
            error!("session {}: dropping connection from {}: {} ({})", session_id, peer, class, e);
        }
    }

    fn make_client(&self, stream: tokio::net::TcpStream) -> io::Result<Box<dyn ClientLink>> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        (self.clients)(stream)
    }
}
