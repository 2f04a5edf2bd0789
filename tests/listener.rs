use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use freerds_ng::client::{ClientLink, LineClient};
use freerds_ng::config::SessionConfig;
use freerds_ng::listener::{ClientFactory, Job, Listener, ThreadSpawner, WorkerSpawner};
use freerds_ng::module::ModuleRegistry;
use freerds_ng::process::ProcessContext;
use freerds_ng::term::TermEvent;
use freerds_ng::transport::pipe_path;

/// Refuses the first `failures` spawns the way pthread_create does when
/// the process is out of threads.
struct FlakySpawner {
    failures: AtomicUsize,
    spawned: AtomicUsize,
}

impl FlakySpawner {
    fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            spawned: AtomicUsize::new(0),
        }
    }
}

impl WorkerSpawner for FlakySpawner {
    fn spawn(&self, name: String, job: Job) -> io::Result<()> {
        let refuse = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(io::Error::from(nix::errno::Errno::EAGAIN));
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        ThreadSpawner.spawn(name, job)
    }
}

fn line_clients() -> ClientFactory {
    Arc::new(|stream: TcpStream| Ok(Box::new(LineClient::new(stream)) as Box<dyn ClientLink>))
}

fn context(dir: &std::path::Path, term: TermEvent) -> ProcessContext {
    let config = SessionConfig {
        width: 128,
        height: 64,
        pipe_dir: dir.to_path_buf(),
        connect_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    };
    ProcessContext::new(config, ModuleRegistry::with_builtins(), term)
}

async fn bind(ctx: ProcessContext, spawner: Arc<dyn WorkerSpawner>) -> Listener {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Listener::bind(addr, ctx, spawner, line_clients()).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_worker_start_drops_only_that_connection() {
    let dir = tempfile::tempdir().unwrap();
    let term = TermEvent::new().unwrap();
    let spawner = Arc::new(FlakySpawner::new(1));
    // session ids are handed out process-wide, so cover a few
    let managers: Vec<UnixListener> = (1..=4)
        .map(|id| UnixListener::bind(pipe_path(dir.path(), id, "rdp")).unwrap())
        .collect();
    let listener = bind(context(dir.path(), term.clone()), spawner.clone()).await;
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { listener.run().await });

    let first = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut line = String::new();
        // the refused connection is closed without a byte
        let n = BufReader::new(&mut stream).read_line(&mut line).unwrap_or(0);
        (n, line)
    })
    .await
    .unwrap();
    assert_eq!(first, (0, String::new()));

    let second = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut line = String::new();
        BufReader::new(stream.try_clone().unwrap()).read_line(&mut line).unwrap();
        stream.write_all(b"quit\n").unwrap();
        line
    })
    .await
    .unwrap();
    // every session opens with the default cursor upload
    assert_eq!(second, "begin\n");
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);

    term.set();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    drop(managers);
}

#[tokio::test]
async fn run_returns_once_terminated() {
    let dir = tempfile::tempdir().unwrap();
    let term = TermEvent::new().unwrap();
    let listener = bind(context(dir.path(), term.clone()), Arc::new(ThreadSpawner)).await;

    term.set();
    tokio::time::timeout(Duration::from_secs(5), listener.run())
        .await
        .unwrap()
        .unwrap();
}
