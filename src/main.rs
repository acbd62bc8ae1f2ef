use anyhow::Context;
use clap::Parser;
use log::{error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::thread;
use tokio::sync::{mpsc, watch};

use art_slideshow::config::{load_settings, Cli, Command, PlayerConfig, ServerConfig};
use art_slideshow::http_server::{run_http_server, ServerState};
use art_slideshow::index_watcher::IndexService;
use art_slideshow::player::{spawn_stdin_reader, Player};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Command::Serve(args) => serve(ServerConfig::resolve(&args, &settings)?).await,
        Command::Play(args) => play(PlayerConfig::resolve(&args, &settings)?).await,
    }
}

fn setup_signal_handler(shutdown: watch::Sender<bool>) -> anyhow::Result<thread::JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to register signal handlers")?;
    Ok(thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!("Received signal {}, shutting down...", signal);
            let _ = shutdown.send(true);
        }
    }))
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    info!("Art slideshow server {}", env!("CARGO_PKG_VERSION"));
    info!("Image directory: {}", config.image_dir.display());

    let service = match IndexService::start(&config.image_dir).await {
        Ok(service) => service,
        Err(e) if e.is_startup_misconfiguration() => {
            error!("{}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("failed to initialize the image index"),
    };
    info!("Finished initialization");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let _signal_handle = setup_signal_handler(shutdown_tx)?;

    let state = ServerState::new(service.index(), config.frontend_dir.clone());
    let result = run_http_server(&config, state, shutdown_rx).await;

    service.shutdown().await;
    result.context("HTTP server failed")
}

async fn play(config: PlayerConfig) -> anyhow::Result<()> {
    info!(
        "Playing images from {} every {} ms",
        config.server_url, config.interval_ms
    );
    info!("Commands: <enter> play/pause, n next, p previous, i <min> <sec> interval, t countdown, b progress bar, q quit");

    let player = Player::new(&config).context("failed to start player")?;
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let reader = spawn_stdin_reader(commands_tx);

    let mut stdout = std::io::stdout();
    let view = player.run(commands_rx, &mut stdout).await?;
    reader.abort();

    info!("Slideshow ended with {} images in history", view.history_len);
    Ok(())
}
