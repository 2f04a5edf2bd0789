//! The per-connection session process.
//!
//! A [`Process`] owns everything one connection needs: the transport to the
//! session manager, the window manager (and through it the cache), the
//! module and the client link. [`Process::run`] drives it from
//! `Established` to `Closed` on the calling thread.

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::fd::AsFd;
use std::sync::Arc;

use crate::bridge::{BridgeState, Server};
use crate::client::{ClientLink, InputEvent};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError, TransportError};
use crate::ipc::{IpcMessage, MessageDecoder};
use crate::module::{msg, Flow, Module, ModuleRegistry, WaitObjects};
use crate::region::Rect;
use crate::term::TermEvent;
use crate::transport::NamedPipe;
use crate::wm::{ModuleEvent, WindowManager};

const READ_BUF_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Listening,
    Established,
    TransportConnecting,
    TransportConnected,
    ModuleLoaded,
    Running,
    Terminating,
    Closed,
}

/// What every session process shares with the listener that spawned it.
#[derive(Clone)]
pub struct ProcessContext {
    pub config: Arc<SessionConfig>,
    pub registry: Arc<ModuleRegistry>,
    pub term: TermEvent,
}

impl ProcessContext {
    pub fn new(config: SessionConfig, registry: ModuleRegistry, term: TermEvent) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            term,
        }
    }
}

/// Resources that exist from `TransportConnected` until `Closed`.
struct Session {
    transport: NamedPipe,
    decoder: MessageDecoder,
    wm: WindowManager,
    bridge: BridgeState,
    module: Box<dyn Module>,
}

impl Session {
    fn close(mut self, session_id: u32) {
        self.module.end();
        info!(
            "session {} closed (module {}, pipe {})",
            session_id,
            self.module.name(),
            self.transport.name()
        );
    }
}

#[derive(Debug, Default)]
struct Ready {
    transport: bool,
    client: bool,
    module: bool,
}

pub struct Process {
    session_id: u32,
    ctx: ProcessContext,
    client: Box<dyn ClientLink>,
    states: Vec<ProcessState>,
}

impl Process {
    pub fn new(session_id: u32, ctx: ProcessContext, client: Box<dyn ClientLink>) -> Self {
        Self {
            session_id,
            ctx,
            client,
            states: vec![ProcessState::Listening],
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn state(&self) -> ProcessState {
        self.states.last().copied().unwrap_or(ProcessState::Listening)
    }

    /// Every state the process has been in, oldest first.
    pub fn states(&self) -> &[ProcessState] {
        &self.states
    }

    fn enter(&mut self, state: ProcessState) {
        debug!("session {}: {:?} -> {:?}", self.session_id, self.state(), state);
        self.states.push(state);
    }

    /// Runs the session to completion. A client hangup, a logoff or a
    /// termination request ends it with `Ok`; the error that ended the
    /// session otherwise.
    pub fn run(&mut self) -> Result<()> {
        self.enter(ProcessState::Established);
        let result = match self.establish() {
            Ok(mut session) => {
                self.enter(ProcessState::Running);
                let result = self.event_loop(&mut session);
                self.enter(ProcessState::Terminating);
                session.close(self.session_id);
                result
            }
            Err(e) => {
                self.enter(ProcessState::Terminating);
                Err(e)
            }
        };
        let result = match result {
            Err(SessionError::ClientClosed) => {
                info!("session {}: client disconnected", self.session_id);
                Ok(())
            }
            Err(SessionError::Transport(TransportError::Closed)) => {
                info!("session {}: session manager closed the pipe", self.session_id);
                Ok(())
            }
            other => other,
        };
        if let Err(e) = &result {
            error!("session {} failed: {}", self.session_id, e);
        }
        self.enter(ProcessState::Closed);
        result
    }

    fn establish(&mut self) -> Result<Session> {
        let config = Arc::clone(&self.ctx.config);

        self.enter(ProcessState::TransportConnecting);
        let transport = NamedPipe::connect(
            &config.pipe_dir,
            self.session_id,
            &config.endpoint,
            config.connect_timeout,
        )?;
        self.enter(ProcessState::TransportConnected);

        let mut module = self.ctx.registry.create(&config.module)?;
        let cache_config = self
            .client
            .cache_config()
            .unwrap_or_else(|| config.cache.clone())
            .validated();
        let mut wm = WindowManager::new(config.width.into(), config.height.into(), cache_config);
        let keys = self.client.persistent_keys();
        if !keys.is_empty() {
            let loaded = wm.cache_mut().preload_persistent(&keys);
            info!("session {}: preloaded {} persistent bitmap keys", self.session_id, loaded);
        }
        wm.send_static_pointers(&mut self.client)?;
        let mut bridge = BridgeState::new(config.bpp);

        let started = {
            let mut server = Server::new(&mut wm, &mut bridge, &mut self.client, &self.ctx.term);
            module
                .start(&mut server, config.width, config.height, config.bpp)
                .and_then(|()| module.connect(&mut server))
        };
        if let Err(e) = started {
            module.end();
            return Err(e);
        }
        wm.set_module_active(true);
        info!("session {}: module {} loaded", self.session_id, module.name());
        self.enter(ProcessState::ModuleLoaded);

        Ok(Session {
            transport,
            decoder: MessageDecoder::new(),
            wm,
            bridge,
            module,
        })
    }

    fn event_loop(&mut self, session: &mut Session) -> Result<()> {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            if self.ctx.term.is_set() {
                info!("session {}: termination requested", self.session_id);
                return Ok(());
            }
            let ready = wait(self.client.as_ref(), session, &self.ctx.term)?;
            if self.ctx.term.is_set() {
                continue;
            }

            if ready.transport && self.on_transport(session, &mut buf)? == Flow::Terminate {
                return Ok(());
            }
            if ready.client && self.on_client(session)? == Flow::Terminate {
                return Ok(());
            }

            let Session { wm, bridge, module, .. } = &mut *session;
            let mut server = Server::new(wm, bridge, &mut self.client, &self.ctx.term);
            if ready.module && module.signal(&mut server)? == Flow::Terminate {
                info!("session {}: module {} requested termination", self.session_id, module.name());
                return Ok(());
            }
            if module.check_wait_objs(&mut server)? == Flow::Terminate {
                info!("session {}: module {} finished", self.session_id, module.name());
                return Ok(());
            }
        }
    }

    fn on_transport(&mut self, session: &mut Session, buf: &mut [u8]) -> Result<Flow> {
        let n = session.transport.read(buf)?;
        session.decoder.push(&buf[..n]);
        while let Some(message) = session.decoder.next_message()? {
            match message {
                IpcMessage::Heartbeat => {
                    session.transport.write_all(&IpcMessage::Heartbeat.encode()?)?;
                }
                IpcMessage::Logoff => {
                    info!("session {}: logoff requested", self.session_id);
                    return Ok(Flow::Terminate);
                }
                IpcMessage::SetParam { name, value } => session.module.set_param(&name, &value)?,
                IpcMessage::SessionChange { kind, param } => {
                    session.module.session_change(kind, param)?;
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn on_client(&mut self, session: &mut Session) -> Result<Flow> {
        for event in self.client.poll_input()? {
            let forwarded: Vec<ModuleEvent> = match event {
                InputEvent::Mouse { flags, x, y } => {
                    let (x, y) = clamp_to_desktop(&session.wm, x, y);
                    session.wm.process_input_mouse(flags, x, y, &mut self.client)?
                }
                InputEvent::Key { flags, scan_code } => {
                    session.wm.key(flags, scan_code, &mut self.client)?.into_iter().collect()
                }
                InputEvent::Sync { flags } => session.wm.key_sync(flags).into_iter().collect(),
                InputEvent::FrameAck { frame_id } => {
                    let deleted = session.wm.cache_mut().offscreen_mut().acknowledge();
                    if !deleted.is_empty() {
                        debug!("frame {} acknowledged, released surfaces {:?}", frame_id, deleted);
                    }
                    Vec::new()
                }
                InputEvent::Refresh(rect) => desktop(&session.wm)
                    .intersect(&rect)
                    .map(|area| {
                        ModuleEvent::new(
                            msg::INVALIDATE,
                            area.left.into(),
                            area.top.into(),
                            area.width().into(),
                            area.height().into(),
                        )
                    })
                    .into_iter()
                    .collect(),
                InputEvent::Quit => {
                    info!("session {}: client quit", self.session_id);
                    return Ok(Flow::Terminate);
                }
            };

            let Session { wm, bridge, module, .. } = &mut *session;
            let mut server = Server::new(wm, bridge, &mut self.client, &self.ctx.term);
            for ev in forwarded {
                module.event(&mut server, ev.msg, ev.p1, ev.p2, ev.p3, ev.p4)?;
            }
        }
        Ok(Flow::Continue)
    }
}

fn desktop(wm: &WindowManager) -> Rect {
    wm.screen_rect(wm.screen()).unwrap_or_default()
}

/// Pins client pointer coordinates onto the desktop.
fn clamp_to_desktop(wm: &WindowManager, x: i32, y: i32) -> (i32, i32) {
    let area = desktop(wm);
    (
        x.clamp(area.left, (area.right - 1).max(area.left)),
        y.clamp(area.top, (area.bottom - 1).max(area.top)),
    )
}

/// Blocks until the termination event, the transport, the client or one of
/// the module's wait objects is ready, or the module's timeout elapses.
fn wait(client: &dyn ClientLink, session: &Session, term: &TermEvent) -> Result<Ready> {
    let mut objs = WaitObjects::new();
    session.module.get_wait_objs(&mut objs);

    let mut fds = vec![
        PollFd::new(term.as_fd(), PollFlags::POLLIN),
        PollFd::new(session.transport.as_fd(), PollFlags::POLLIN),
        PollFd::new(client.wait_fd(), PollFlags::POLLIN),
    ];
    fds.extend(objs.read().iter().map(|fd| PollFd::new(*fd, PollFlags::POLLIN)));
    fds.extend(objs.write().iter().map(|fd| PollFd::new(*fd, PollFlags::POLLOUT)));

    let timeout = match objs.timeout() {
        None => PollTimeout::NONE,
        // longer hints just wake the loop early
        Some(t) => PollTimeout::from(u16::try_from(t.as_millis()).unwrap_or(u16::MAX)),
    };

    match poll(&mut fds, timeout) {
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok(Ready::default()),
        Err(e) => {
            warn!("poll failed: {}", e);
            return Err(e.into());
        }
    }

    let is_ready = |fd: &PollFd<'_>| fd.revents().is_some_and(|r| !r.is_empty());
    Ok(Ready {
        transport: is_ready(&fds[1]),
        client: is_ready(&fds[2]),
        module: fds[3..].iter().any(is_ready),
    })
}
