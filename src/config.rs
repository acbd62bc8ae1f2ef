use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::playback::{validate_interval, DEFAULT_INTERVAL_MS};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HTTPS_PORT: u16 = 3443;
pub const DEFAULT_IMAGE_DIR: &str = "sample-images";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3001";

#[derive(Parser, Debug)]
#[command(author, version, about = "Random image slideshow server and player", long_about = None)]
pub struct Cli {
    /// TOML settings file; command line and environment take precedence
    #[arg(short, long, global = true, env = "SLIDESHOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve images from a folder over HTTP
    Serve(ServeArgs),
    /// Run a slideshow against a server, controlled from stdin
    Play(PlayArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Directory containing images to serve
    #[arg(short, long, env = "IMAGE_FOLDER")]
    pub image_dir: Option<PathBuf>,

    /// HTTP port (redirects to HTTPS when TLS is configured)
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// HTTPS port, used only with --tls-key and --tls-cert
    #[arg(long, env = "HTTPS_PORT")]
    pub https_port: Option<u16>,

    /// TLS private key (PEM)
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// TLS certificate chain (PEM)
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Built front-end to serve at /
    #[arg(long, env = "FRONTEND_BUILD_PATH")]
    pub frontend_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct PlayArgs {
    /// Base URL of the slideshow server
    #[arg(short, long, env = "SLIDESHOW_SERVER")]
    pub server: Option<String>,

    /// Milliseconds between images (at least 1000)
    #[arg(short, long, env = "SLIDESHOW_INTERVAL_MS")]
    pub interval_ms: Option<u64>,

    /// Start playing immediately instead of paused
    #[arg(long)]
    pub autoplay: bool,

    /// Hide the countdown
    #[arg(long)]
    pub hide_countdown: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub hide_progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Option<ServerSettings>,
    pub player: Option<PlayerSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerSettings {
    pub image_dir: Option<PathBuf>,
    pub port: Option<u16>,
    pub https_port: Option<u16>,
    pub tls_key: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub frontend_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerSettings {
    pub server_url: Option<String>,
    pub interval_ms: Option<u64>,
    pub timer_visible: Option<bool>,
    pub progress_bar_visible: Option<bool>,
}

pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = match path {
        Some(path) => path,
        None => return Ok(Settings::default()),
    };
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub key: PathBuf,
    pub cert: PathBuf,
    pub https_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub image_dir: PathBuf,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    pub frontend_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn resolve(args: &ServeArgs, settings: &Settings) -> Result<Self, ConfigError> {
        let file = settings.server.clone().unwrap_or_default();

        let key = args.tls_key.clone().or(file.tls_key);
        let cert = args.tls_cert.clone().or(file.tls_cert);
        let tls = match (key, cert) {
            (Some(key), Some(cert)) => Some(TlsConfig {
                key,
                cert,
                https_port: args.https_port.or(file.https_port).unwrap_or(DEFAULT_HTTPS_PORT),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        Ok(Self {
            image_dir: args
                .image_dir
                .clone()
                .or(file.image_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            tls,
            frontend_dir: args.frontend_dir.clone().or(file.frontend_dir),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConfig {
    pub server_url: String,
    pub interval_ms: u64,
    pub autoplay: bool,
    pub timer_visible: bool,
    pub progress_bar_visible: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            interval_ms: DEFAULT_INTERVAL_MS,
            autoplay: false,
            timer_visible: true,
            progress_bar_visible: true,
        }
    }
}

impl PlayerConfig {
    pub fn resolve(args: &PlayArgs, settings: &Settings) -> Result<Self, ConfigError> {
        let file = settings.player.clone().unwrap_or_default();
        let defaults = Self::default();

        let interval_ms = args.interval_ms.or(file.interval_ms).unwrap_or(defaults.interval_ms);
        validate_interval(interval_ms)?;

        Ok(Self {
            server_url: args
                .server
                .clone()
                .or(file.server_url)
                .unwrap_or(defaults.server_url),
            interval_ms,
            autoplay: args.autoplay,
            timer_visible: !args.hide_countdown
                && file.timer_visible.unwrap_or(defaults.timer_visible),
            progress_bar_visible: !args.hide_progress
                && file.progress_bar_visible.unwrap_or(defaults.progress_bar_visible),
        })
    }
}
