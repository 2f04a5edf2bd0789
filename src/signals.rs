//! Process-wide signal handling.
//!
//! Must run before any other thread is created: the mask installed here is
//! inherited by every thread spawned afterwards, so all asynchronous
//! signals end up at the dedicated signal thread. Crash signals stay
//! unblocked and are delivered to the faulting thread.

use log::{debug, error, info, warn};
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use std::io;
use std::thread::{self, JoinHandle};

use crate::term::TermEvent;

const CRASH_SIGNALS: [Signal; 4] = [
    Signal::SIGILL,
    Signal::SIGSEGV,
    Signal::SIGFPE,
    Signal::SIGBUS,
];

/// Blocks every non-crash signal on the calling thread and starts the
/// thread that waits for them. The returned handle may be dropped.
pub fn start_signal_thread(term: TermEvent) -> io::Result<JoinHandle<()>> {
    let mut mask = SigSet::empty();
    for sig in Signal::iterator().filter(|s| !CRASH_SIGNALS.contains(s)) {
        mask.add(sig);
    }
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).map_err(io::Error::from)?;

    thread::Builder::new()
        .name("signals".into())
        .spawn(move || signal_loop(mask, term))
}

fn signal_loop(mask: SigSet, term: TermEvent) {
    debug!("signal thread started");
    loop {
        match mask.wait() {
            Ok(Signal::SIGINT | Signal::SIGTERM | Signal::SIGQUIT) => {
                info!("shutdown signal received");
                term.set();
            }
            Ok(Signal::SIGHUP) => info!("SIGHUP received, nothing to reload"),
            Ok(Signal::SIGCHLD) => reap_children(),
            Ok(Signal::SIGPIPE) => {}
            Ok(other) => debug!("ignoring {:?}", other),
            Err(e) => {
                error!("sigwait failed: {}", e);
                return;
            }
        }
    }
}

fn reap_children() {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => return,
            Ok(status) => debug!("reaped child: {:?}", status),
            Err(nix::errno::Errno::ECHILD) => return,
            Err(e) => {
                warn!("waitpid failed: {}", e);
                return;
            }
        }
    }
}
