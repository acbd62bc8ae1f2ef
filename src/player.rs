use log::{debug, info, warn};
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::config::PlayerConfig;
use crate::error::{FetchError, PlayerError};
use crate::playback::{
    format_countdown, interval_from_parts, Clock, FetchTicket, PlaybackController, PlaybackState,
    PlaybackView, SystemClock, TICK_PERIOD,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PROGRESS_BAR_WIDTH: usize = 20;
const CLEAR_TO_END_OF_LINE: &str = "\x1b[K";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    TogglePlay,
    Next,
    Previous,
    SetInterval(u64),
    ToggleCountdown,
    ToggleProgressBar,
    Quit,
}

/// Parses one line of viewer input.
pub fn parse_command(line: &str) -> Option<PlayerCommand> {
    let mut words = line.split_whitespace();
    let command = match words.next() {
        None | Some("space") | Some("play") | Some("pause") => PlayerCommand::TogglePlay,
        Some("n") | Some("next") | Some("right") => PlayerCommand::Next,
        Some("p") | Some("prev") | Some("previous") | Some("left") => PlayerCommand::Previous,
        Some("t") | Some("timer") => PlayerCommand::ToggleCountdown,
        Some("b") | Some("bar") => PlayerCommand::ToggleProgressBar,
        Some("q") | Some("quit") | Some("exit") => PlayerCommand::Quit,
        Some("i") | Some("interval") => {
            let first: u64 = words.next()?.parse().ok()?;
            let ms = match words.next() {
                Some(seconds) => interval_from_parts(first, seconds.parse().ok()?)?,
                None => interval_from_parts(0, first)?,
            };
            PlayerCommand::SetInterval(ms)
        }
        Some(_) => return None,
    };
    if words.next().is_some() && !matches!(command, PlayerCommand::SetInterval(_)) {
        return None;
    }
    Some(command)
}

/// Body of the random-image and by-index endpoints; only the path is used.
#[derive(Debug, Deserialize)]
struct ImageDescriptor {
    image: Option<String>,
}

/// HTTP side of the player: asks the server for image descriptors and
/// downloads the images they name.
#[derive(Clone)]
pub struct ImageClient {
    http: reqwest::Client,
    base: Url,
}

impl ImageClient {
    pub fn new(server_url: &str) -> Result<Self, FetchError> {
        let base = Url::parse(server_url)?;
        if base.cannot_be_a_base() {
            return Err(FetchError::BaseUrl(server_url.to_string()));
        }
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::BaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `/images/<path>` with the whole relative path encoded as one segment.
    pub fn image_url(&self, relative_path: &str) -> Result<Url, FetchError> {
        self.endpoint(&["images", relative_path])
    }

    async fn descriptor(&self, url: Url) -> Result<ImageDescriptor, FetchError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NoImages);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    pub async fn random_image(&self) -> Result<String, FetchError> {
        let url = self.endpoint(&["api", "random-image"])?;
        self.descriptor(url).await?.image.ok_or(FetchError::NoImages)
    }

    /// `None` when the server has no image at `index`.
    pub async fn image_at(&self, index: usize) -> Result<Option<String>, FetchError> {
        let url = self.endpoint(&["api", "index", &index.to_string()])?;
        Ok(self.descriptor(url).await?.image)
    }

    /// Downloads and decodes the image so that broken files fail here rather
    /// than after they are shown.
    pub async fn load(&self, relative_path: &str) -> Result<Url, FetchError> {
        let url = self.image_url(relative_path)?;
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        let decoded = image::load_from_memory(&bytes)?;
        debug!("Loaded {} ({}x{})", url, decoded.width(), decoded.height());
        Ok(url)
    }

    /// Picks a random image and loads it, returning the URL to display.
    pub async fn fetch_random(&self) -> Result<String, FetchError> {
        let path = self.random_image().await?;
        Ok(self.load(&path).await?.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSettings {
    pub timer_visible: bool,
    pub progress_bar_visible: bool,
}

/// One status line for the current controller view.
pub fn render(view: &PlaybackView, settings: &ViewSettings) -> String {
    let mut parts = Vec::new();
    parts.push(format!("[{}]", if view.playing { "playing" } else { "paused" }));

    match view.state {
        PlaybackState::Idle => parts.push("Waiting for first image".to_string()),
        PlaybackState::Loading => parts.push("Loading next image...".to_string()),
        PlaybackState::Error => parts.push(format!(
            "Failed to load image: {}",
            view.error.as_deref().unwrap_or("unknown error")
        )),
        PlaybackState::Displayed => {
            if let (Some(position), Some(current)) = (view.position, view.current.as_deref()) {
                parts.push(format!("{}/{} {}", position + 1, view.history_len, current));
            }
        }
    }

    if settings.timer_visible {
        parts.push(format_countdown(view.countdown.remaining_ms));
    }
    if settings.progress_bar_visible {
        let filled = (view.countdown.progress_percent / 100.0 * PROGRESS_BAR_WIDTH as f64).round() as usize;
        let filled = filled.min(PROGRESS_BAR_WIDTH);
        parts.push(format!(
            "[{}{}] {:.0}%",
            "#".repeat(filled),
            "-".repeat(PROGRESS_BAR_WIDTH - filled),
            view.countdown.progress_percent
        ));
    }
    parts.join(" | ")
}

type Completion = (FetchTicket, Result<String, FetchError>);

/// Drives a [`PlaybackController`]: runs the tick timer, performs the fetches
/// it asks for, and applies viewer commands, all from one task.
pub struct Player<C: Clock = SystemClock> {
    controller: PlaybackController<C>,
    client: ImageClient,
    settings: ViewSettings,
    autoplay: bool,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    last_frame: String,
}

impl Player<SystemClock> {
    pub fn new(config: &PlayerConfig) -> Result<Self, PlayerError> {
        let controller = PlaybackController::new(SystemClock::new(), config.interval_ms)?;
        Self::with_controller(config, controller)
    }
}

impl<C: Clock> Player<C> {
    pub fn with_controller(config: &PlayerConfig, controller: PlaybackController<C>) -> Result<Self, PlayerError> {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Ok(Self {
            controller,
            client: ImageClient::new(&config.server_url)?,
            settings: ViewSettings {
                timer_visible: config.timer_visible,
                progress_bar_visible: config.progress_bar_visible,
            },
            autoplay: config.autoplay,
            completions_tx,
            completions_rx,
            last_frame: String::new(),
        })
    }

    pub fn controller(&self) -> &PlaybackController<C> {
        &self.controller
    }

    pub fn settings(&self) -> ViewSettings {
        self.settings
    }

    fn start_fetch(&self, ticket: Option<FetchTicket>) {
        let ticket = match ticket {
            Some(ticket) => ticket,
            None => return,
        };
        let client = self.client.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = client.fetch_random().await;
            let _ = completions.send((ticket, outcome));
        });
    }

    /// Applies one viewer command. Returns `false` for [`PlayerCommand::Quit`].
    pub fn handle_command(&mut self, command: PlayerCommand) -> bool {
        match command {
            PlayerCommand::TogglePlay => {
                let playing = self.controller.toggle_play();
                info!("Slideshow {}", if playing { "resumed" } else { "paused" });
            }
            PlayerCommand::Next => {
                let ticket = self.controller.advance();
                self.start_fetch(ticket);
            }
            PlayerCommand::Previous => {
                self.controller.retreat();
            }
            PlayerCommand::SetInterval(ms) => match self.controller.set_interval(ms) {
                Ok(()) => info!("Interval set to {} ms", ms),
                Err(e) => warn!("{}", e),
            },
            PlayerCommand::ToggleCountdown => {
                self.settings.timer_visible = !self.settings.timer_visible;
            }
            PlayerCommand::ToggleProgressBar => {
                self.settings.progress_bar_visible = !self.settings.progress_bar_visible;
            }
            PlayerCommand::Quit => return false,
        }
        true
    }

    /// Redraws the status line in place, clearing what the previous frame left
    /// behind.
    fn render_if_changed<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        let frame = render(&self.controller.view(), &self.settings);
        if frame != self.last_frame {
            write!(out, "\r{}{}", frame, CLEAR_TO_END_OF_LINE)?;
            out.flush()?;
            self.last_frame = frame;
        }
        Ok(())
    }

    /// Runs until a quit command arrives or the command channel closes, and
    /// returns the final view.
    pub async fn run<W: Write>(
        mut self,
        mut commands: mpsc::Receiver<PlayerCommand>,
        out: &mut W,
    ) -> std::io::Result<PlaybackView> {
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let initial = self.controller.fetch();
        self.start_fetch(initial);
        if self.autoplay {
            self.controller.toggle_play();
        }
        self.render_if_changed(out)?;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ticket = self.controller.tick();
                    self.start_fetch(ticket);
                }
                command = commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command),
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
                Some((ticket, outcome)) = self.completions_rx.recv() => {
                    self.controller.complete_fetch(ticket, outcome);
                }
            }
            self.render_if_changed(out)?;
        }

        writeln!(out)?;
        Ok(self.controller.view())
    }
}

/// Feeds stdin lines into `commands` until EOF, which is treated as quit.
pub fn spawn_stdin_reader(commands: mpsc::Sender<PlayerCommand>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let command = match lines.next_line().await {
                Ok(Some(line)) => match parse_command(&line) {
                    Some(command) => command,
                    None => {
                        warn!("Unknown command: {:?}", line.trim());
                        continue;
                    }
                },
                Ok(None) => PlayerCommand::Quit,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    PlayerCommand::Quit
                }
            };
            let quit = command == PlayerCommand::Quit;
            if commands.send(command).await.is_err() || quit {
                break;
            }
        }
    })
}
