use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// The index holds no images. Not fatal, the API reports it as a 404.
    #[error("No Images Found")]
    EmptyIndex,
    #[error("image directory {} not found", .0.display())]
    MissingRoot(PathBuf),
    #[error("image directory {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("image scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Errors that must stop the server before it starts listening.
    pub fn is_startup_misconfiguration(&self) -> bool {
        matches!(self, IndexError::MissingRoot(_) | IndexError::NotADirectory(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("interval must be at least {minimum_ms} ms (got {requested_ms} ms)")]
    InvalidInterval { requested_ms: u64, minimum_ms: u64 },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("No Images Found")]
    NoImages,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server url {0} cannot carry a path")]
    BaseUrl(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("TLS requires both a key and a certificate")]
    IncompleteTls,
    #[error(transparent)]
    Interval(#[from] PlaybackError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: warp::Error,
    },
    #[error("TLS file {} not found", .0.display())]
    MissingTlsFile(PathBuf),
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
