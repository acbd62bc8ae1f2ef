pub mod config;
pub mod error;
pub mod http_server;
pub mod image_index;
pub mod index_watcher;
pub mod playback;
pub mod player;
pub mod scanner;
