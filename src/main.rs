//! freerds-server: accepts RDP clients and runs one session per connection.

use clap::Parser;
use log::{error, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{self, Pid};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use freerds_ng::client::{ClientLink, LineClient};
use freerds_ng::config::{SessionConfig, StartupParams};
use freerds_ng::listener::{ClientFactory, Listener, ThreadSpawner};
use freerds_ng::module::ModuleRegistry;
use freerds_ng::process::ProcessContext;
use freerds_ng::signals::start_signal_thread;
use freerds_ng::term::TermEvent;

#[cfg(target_os = "android")]
fn init_logging(debug: bool) {
    let level = if debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(level)
            .with_tag("freerds-server"),
    );
}

#[cfg(not(target_os = "android"))]
fn init_logging(debug: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Sends SIGTERM to the server whose pid is in `pid_file`.
fn kill_running(pid_file: &Path) -> ExitCode {
    let pid = match fs::read_to_string(pid_file) {
        Ok(text) => match text.trim().parse::<i32>() {
            Ok(pid) => pid,
            Err(e) => {
                error!("invalid pid file {}: {}", pid_file.display(), e);
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            error!("failed to read pid file {}: {}", pid_file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            info!("sent SIGTERM to {}", pid);
            if let Err(e) = fs::remove_file(pid_file) {
                warn!("failed to remove pid file {}: {}", pid_file.display(), e);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("failed to signal {}: {}", pid, e);
            ExitCode::FAILURE
        }
    }
}

fn line_clients() -> ClientFactory {
    Arc::new(|stream: std::net::TcpStream| Ok(Box::new(LineClient::new(stream)) as Box<dyn ClientLink>))
}

fn main() -> ExitCode {
    let params = StartupParams::parse();
    init_logging(params.debug);

    if params.kill {
        return kill_running(&params.pid_file);
    }

    let config = match SessionConfig::from_params(&params) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let registry = ModuleRegistry::with_builtins();
    if registry.create(&config.module).is_err() {
        error!("unknown module {} (available: {})", config.module, registry.names().join(", "));
        return ExitCode::FAILURE;
    }

    // No thread may exist yet: daemon() forks and the signal mask is
    // inherited by every thread created later.
    if params.fork && !params.nodaemon {
        if let Err(e) = unistd::daemon(true, false) {
            error!("failed to fork into the background: {}", e);
            return ExitCode::FAILURE;
        }
    }
    if let Err(e) = fs::write(&params.pid_file, format!("{}\n", unistd::getpid())) {
        warn!("failed to write pid file {}: {}", params.pid_file.display(), e);
    }

    let term = match TermEvent::new() {
        Ok(term) => term,
        Err(e) => {
            error!("failed to create termination event: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = start_signal_thread(term.clone()) {
        error!("failed to start signal thread: {}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("starting freerds-server on port {} with module {}", params.port, config.module);
    let ctx = ProcessContext::new(config, registry, term);
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, params.port));
    let result = runtime.block_on(async {
        let listener = Listener::bind(addr, ctx, Arc::new(ThreadSpawner), line_clients()).await?;
        listener.run().await
    });

    if let Err(e) = fs::remove_file(&params.pid_file) {
        warn!("failed to remove pid file {}: {}", params.pid_file.display(), e);
    }
    match result {
        Ok(()) => {
            info!("freerds-server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("listener failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
