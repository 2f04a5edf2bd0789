//! Built-in modules.

pub mod blank;

pub use blank::BlankModule;
