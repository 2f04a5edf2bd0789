//! Startup parameters and per-session configuration.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::modules::BlankModule;
use crate::transport::{DEFAULT_CONNECT_TIMEOUT_MS, PIPE_DIR};

pub const MIN_DIMENSION: u16 = 1;
pub const MAX_DIMENSION: u16 = 8192;
pub const SUPPORTED_BPP: [u8; 5] = [8, 15, 16, 24, 32];

#[derive(Parser, Debug, Clone)]
#[command(name = "freerds-server")]
#[command(version, about = "RDP session server")]
pub struct StartupParams {
    /// TCP port to listen on
    #[arg(short, long, default_value_t = 3389)]
    pub port: u16,

    /// Stop the running server named in the pid file
    #[arg(short, long)]
    pub kill: bool,

    /// Stay in the foreground
    #[arg(short, long)]
    pub nodaemon: bool,

    /// Start in the background
    #[arg(short, long, conflicts_with = "nodaemon")]
    pub fork: bool,

    #[arg(long, default_value = "/var/run/freerds-server.pid")]
    pub pid_file: PathBuf,

    /// Directory holding the session-manager pipe files
    #[arg(long, default_value = PIPE_DIR)]
    pub pipe_dir: PathBuf,

    /// Module started for every session
    #[arg(short, long, default_value = BlankModule::NAME)]
    pub module: String,

    #[arg(long, default_value_t = 1024)]
    pub width: u16,

    #[arg(long, default_value_t = 768)]
    pub height: u16,

    #[arg(long, default_value_t = 32)]
    pub bpp: u8,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid width: {0} (must be {MIN_DIMENSION}-{MAX_DIMENSION})")]
    Width(u16),
    #[error("invalid height: {0} (must be {MIN_DIMENSION}-{MAX_DIMENSION})")]
    Height(u16),
    #[error("unsupported color depth: {0}")]
    Bpp(u8),
    #[error("session-manager endpoint name must not be empty")]
    Endpoint,
}

/// Settings every session of this server starts with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub width: u16,
    pub height: u16,
    pub bpp: u8,
    /// Endpoint part of the session-manager pipe name.
    pub endpoint: String,
    pub pipe_dir: PathBuf,
    pub connect_timeout: Duration,
    pub module: String,
    pub cache: CacheConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            bpp: 32,
            endpoint: "rdp".to_string(),
            pipe_dir: PathBuf::from(PIPE_DIR),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            module: BlankModule::NAME.to_string(),
            cache: CacheConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_params(params: &StartupParams) -> Result<Self, ConfigError> {
        Self {
            width: params.width,
            height: params.height,
            bpp: params.bpp,
            pipe_dir: params.pipe_dir.clone(),
            module: params.module.clone(),
            ..Self::default()
        }
        .validated()
    }

    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&self.width) {
            return Err(ConfigError::Width(self.width));
        }
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&self.height) {
            return Err(ConfigError::Height(self.height));
        }
        if !SUPPORTED_BPP.contains(&self.bpp) {
            return Err(ConfigError::Bpp(self.bpp));
        }
        if self.endpoint.is_empty() {
            return Err(ConfigError::Endpoint);
        }
        self.cache = self.cache.validated();
        Ok(self)
    }
}
