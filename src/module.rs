//! Session backends ("modules").
//!
//! A module produces the desktop a session shows. It draws through the
//! [`Server`] handed to each call and receives input as `event` messages
//! using the codes in [`msg`].

use std::collections::HashMap;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::Server;
use crate::error::{Result, SessionError};
use crate::modules::BlankModule;

pub use crate::wm::drawable::msg;

/// Whether the session keeps running after a module call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

/// Descriptors and a timeout hint collected for one event-loop wait.
#[derive(Debug, Default)]
pub struct WaitObjects<'a> {
    read: Vec<BorrowedFd<'a>>,
    write: Vec<BorrowedFd<'a>>,
    timeout: Option<Duration>,
}

impl<'a> WaitObjects<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&mut self, fd: BorrowedFd<'a>) {
        self.read.push(fd);
    }

    pub fn add_write(&mut self, fd: BorrowedFd<'a>) {
        self.write.push(fd);
    }

    /// Lowers the wait timeout to `timeout` if that is shorter.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(self.timeout.map_or(timeout, |t| t.min(timeout)));
    }

    pub fn read(&self) -> &[BorrowedFd<'a>] {
        &self.read
    }

    pub fn write(&self) -> &[BorrowedFd<'a>] {
        &self.write
    }

    /// `None` waits without a time limit.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A session backend, driven by the session process.
///
/// Calls arrive in order: `start`, `connect`, then any mix of `event`,
/// `signal`, `set_param` and `session_change`, and finally `end`. Every
/// drawing call goes through the [`Server`] passed in.
pub trait Module: Send {
    /// Registry name, used in logs and errors.
    fn name(&self) -> &str;

    /// Prepares the module for a desktop of the given geometry.
    ///
    /// # Arguments
    ///
    /// * `server` - Drawing bridge of the session.
    /// * `width` - Desktop width in pixels.
    /// * `height` - Desktop height in pixels.
    /// * `bpp` - Client color depth.
    ///
    /// # Returns
    ///
    /// An error aborts the session before it starts running; `end` is still
    /// called.
    fn start(&mut self, server: &mut Server<'_>, width: u16, height: u16, bpp: u8) -> Result<()>;

    /// Connects to the backend and draws the initial desktop.
    fn connect(&mut self, server: &mut Server<'_>) -> Result<()>;

    /// Input and window-manager messages. For `INVALIDATE` the parameters
    /// are x, y, width and height of the area to repaint.
    fn event(&mut self, server: &mut Server<'_>, msg: u32, p1: i64, p2: i64, p3: i64, p4: i64) -> Result<()>;

    /// Called when one of the module's wait objects became ready.
    fn signal(&mut self, _server: &mut Server<'_>) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    /// Releases the backend. Called exactly once, also after a failed start.
    fn end(&mut self) {}

    /// A parameter from the session manager, such as the user name.
    fn set_param(&mut self, _name: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn session_change(&mut self, _kind: u32, _param: u32) -> Result<()> {
        Ok(())
    }

    /// Adds the module's descriptors and timeout hint to the next wait.
    ///
    /// # Arguments
    ///
    /// * `objs` - Collector borrowed for the duration of one wait.
    fn get_wait_objs<'a>(&'a self, _objs: &mut WaitObjects<'a>) {}

    /// Called after every event-loop wakeup.
    fn check_wait_objs(&mut self, _server: &mut Server<'_>) -> Result<Flow> {
        Ok(Flow::Continue)
    }
}

pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Module constructors by name.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the modules that ship with the server.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(BlankModule::NAME, || Box::new(BlankModule::new()));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Module>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| SessionError::ModuleNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn wait_objects_keep_the_shortest_timeout() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut objs = WaitObjects::new();
        assert_eq!(objs.timeout(), None);
        objs.set_timeout(Duration::from_millis(500));
        objs.set_timeout(Duration::from_millis(40));
        objs.set_timeout(Duration::from_millis(100));
        objs.add_read(a.as_fd());
        objs.add_write(b.as_fd());
        assert_eq!(objs.timeout(), Some(Duration::from_millis(40)));
        assert_eq!((objs.read().len(), objs.write().len()), (1, 1));
    }

    #[test]
    fn registry_creates_by_name() {
        let registry = ModuleRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["blank"]);
        assert_eq!(registry.create("blank").unwrap().name(), "blank");
        assert!(matches!(
            registry.create("xvnc"),
            Err(SessionError::ModuleNotFound(name)) if name == "xvnc"
        ));
    }
}
