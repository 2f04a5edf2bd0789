//! FreeRDS session server core.
//!
//! The display-update cache engine, the window manager built on it, the
//! bridge modules draw through, and the per-connection session process
//! that ties a client link, a module and the session-manager pipe together.
//!
//! # Modules
//!
//! - `cache`: palette, bitmap, glyph, pointer, brush and offscreen caches.
//! - `wm`: drawable tree, visible regions, input routing and dragging.
//! - `bridge`: drawing calls from modules turned into cache-aware orders.
//! - `process`: the session state machine and its wait-object event loop.
//! - `listener`: accepts connections and starts one session worker each.

pub mod bridge;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod ipc;
pub mod listener;
pub mod module;
pub mod modules;
pub mod orders;
pub mod process;
pub mod region;
pub mod signals;
pub mod term;
pub mod transport;
pub mod wm;

pub use error::{Result, SessionError};
