//! Client-side playback: a bounded history of shown images and the countdown
//! that advances through it.
//!
//! The controller performs no I/O. Operations that need a new image hand back a
//! [`FetchTicket`]; the driver performs the request and reports the outcome with
//! [`PlaybackController::complete_fetch`]. Only one ticket is ever outstanding.

use log::{debug, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{FetchError, PlaybackError};

pub const LIST_MAX: usize = 100;
pub const MIN_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_INTERVAL_MS: u64 = 2 * 60_000;
pub const TICK_PERIOD: Duration = Duration::from_millis(100);

/// Millisecond time source. Elapsed time is always derived from two readings,
/// never counted down tick by tick.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Displayed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Countdown {
    pub elapsed_ms: u64,
    pub remaining_ms: u64,
    pub progress_percent: f64,
}

impl Countdown {
    pub fn derive(elapsed_ms: u64, interval_ms: u64) -> Self {
        let progress = elapsed_ms as f64 / interval_ms.max(1) as f64 * 100.0;
        Self {
            elapsed_ms,
            remaining_ms: interval_ms.saturating_sub(elapsed_ms),
            progress_percent: progress.min(100.0),
        }
    }
}

/// Fixed-capacity sliding window of image URLs. The oldest entry is evicted
/// when a push exceeds capacity.
#[derive(Debug, Clone)]
pub struct History {
    urls: VecDeque<String>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            urls: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Appends `url`, returning the evicted entry if the window was full.
    pub fn push(&mut self, url: String) -> Option<String> {
        self.urls.push_back(url);
        if self.urls.len() > self.capacity {
            self.urls.pop_front()
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.urls.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Read-only projection of the controller for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackView {
    pub state: PlaybackState,
    pub current: Option<String>,
    pub position: Option<usize>,
    pub history_len: usize,
    pub playing: bool,
    pub fetching: bool,
    pub interval_ms: u64,
    pub countdown: Countdown,
    pub error: Option<String>,
}

pub struct PlaybackController<C: Clock = SystemClock> {
    clock: C,
    history: History,
    position: Option<usize>,
    interval_ms: u64,
    playing: bool,
    anchor_ms: u64,
    paused_elapsed_ms: u64,
    state: PlaybackState,
    in_flight: Option<FetchTicket>,
    next_ticket: u64,
    last_error: Option<String>,
    countdown: Countdown,
}

impl<C: Clock> PlaybackController<C> {
    /// Starts paused with an empty history.
    pub fn new(clock: C, interval_ms: u64) -> Result<Self, PlaybackError> {
        validate_interval(interval_ms)?;
        let anchor_ms = clock.now_ms();
        Ok(Self {
            clock,
            history: History::new(LIST_MAX),
            position: None,
            interval_ms,
            playing: false,
            anchor_ms,
            paused_elapsed_ms: 0,
            state: PlaybackState::Idle,
            in_flight: None,
            next_ticket: 0,
            last_error: None,
            countdown: Countdown::derive(0, interval_ms),
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn current_url(&self) -> Option<&str> {
        self.position.and_then(|p| self.history.get(p))
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Milliseconds since the current image was shown, excluding paused time.
    pub fn elapsed_ms(&self) -> u64 {
        if self.playing {
            self.clock.now_ms().saturating_sub(self.anchor_ms)
        } else {
            self.paused_elapsed_ms
        }
    }

    /// Countdown derived from the clock right now.
    pub fn countdown(&self) -> Countdown {
        Countdown::derive(self.elapsed_ms(), self.interval_ms)
    }

    /// Countdown as of the last tick or anchor reset.
    pub fn last_countdown(&self) -> Countdown {
        self.countdown
    }

    pub fn view(&self) -> PlaybackView {
        PlaybackView {
            state: self.state,
            current: self.current_url().map(str::to_string),
            position: self.position,
            history_len: self.history.len(),
            playing: self.playing,
            fetching: self.is_fetching(),
            interval_ms: self.interval_ms,
            countdown: self.countdown(),
            error: self.last_error.clone(),
        }
    }

    fn reset_anchor(&mut self) {
        self.anchor_ms = self.clock.now_ms();
        self.paused_elapsed_ms = 0;
        self.countdown = Countdown::derive(0, self.interval_ms);
    }

    /// Requests a new image. Returns `None` while another fetch is in flight.
    pub fn fetch(&mut self) -> Option<FetchTicket> {
        if let Some(ticket) = self.in_flight {
            debug!("Fetch {:?} already in flight, suppressing", ticket);
            return None;
        }
        let ticket = FetchTicket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight = Some(ticket);
        self.state = PlaybackState::Loading;
        self.last_error = None;
        self.reset_anchor();
        Some(ticket)
    }

    /// Reports the outcome of `ticket`. Success appends to history and shows the
    /// new tail; failure leaves history and position untouched. Returns `false`
    /// if `ticket` was not the outstanding fetch.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, outcome: Result<String, FetchError>) -> bool {
        if self.in_flight != Some(ticket) {
            debug!("Ignoring completion of {:?}", ticket);
            return false;
        }
        self.in_flight = None;

        match outcome {
            Ok(url) => {
                if let Some(evicted) = self.history.push(url) {
                    debug!("Evicted {} from history", evicted);
                }
                self.position = Some(self.history.len() - 1);
                self.state = PlaybackState::Displayed;
                self.reset_anchor();
            }
            Err(e) => {
                warn!("Error fetching image: {}", e);
                self.state = PlaybackState::Error;
                self.last_error = Some(e.to_string());
            }
        }
        true
    }

    /// Moves to a cached history entry without a network round trip.
    pub fn go_to(&mut self, index: usize) -> bool {
        if index >= self.history.len() {
            return false;
        }
        self.position = Some(index);
        self.state = PlaybackState::Displayed;
        self.last_error = None;
        self.reset_anchor();
        true
    }

    /// Steps forward in history, or requests a new image when at the tail.
    pub fn advance(&mut self) -> Option<FetchTicket> {
        match self.position {
            Some(p) if p + 1 < self.history.len() => {
                self.go_to(p + 1);
                None
            }
            _ => self.fetch(),
        }
    }

    /// Steps back in history. No-op at the first entry.
    pub fn retreat(&mut self) -> bool {
        match self.position {
            Some(p) if p > 0 => self.go_to(p - 1),
            _ => false,
        }
    }

    /// Pauses or resumes, carrying the elapsed time across exactly. Returns the
    /// new playing flag.
    pub fn toggle_play(&mut self) -> bool {
        let now = self.clock.now_ms();
        if self.playing {
            self.paused_elapsed_ms = now.saturating_sub(self.anchor_ms);
        } else {
            self.anchor_ms = now.saturating_sub(self.paused_elapsed_ms);
        }
        self.playing = !self.playing;
        self.countdown = self.countdown();
        self.playing
    }

    /// Called every [`TICK_PERIOD`] while playing. Advances when the countdown
    /// runs out.
    pub fn tick(&mut self) -> Option<FetchTicket> {
        if !self.playing {
            return None;
        }
        self.countdown = self.countdown();
        if self.countdown.remaining_ms > 0 {
            return None;
        }
        self.reset_anchor();
        self.advance()
    }

    /// Changes the interval and restarts the countdown for the current image.
    pub fn set_interval(&mut self, interval_ms: u64) -> Result<(), PlaybackError> {
        validate_interval(interval_ms)?;
        self.interval_ms = interval_ms;
        self.reset_anchor();
        Ok(())
    }
}

pub fn validate_interval(interval_ms: u64) -> Result<(), PlaybackError> {
    if interval_ms < MIN_INTERVAL_MS {
        return Err(PlaybackError::InvalidInterval {
            requested_ms: interval_ms,
            minimum_ms: MIN_INTERVAL_MS,
        });
    }
    Ok(())
}

/// Interval from the minutes and seconds fields of the settings menu. `None`
/// when the total does not fit in a `u64` of milliseconds.
pub fn interval_from_parts(minutes: u64, seconds: u64) -> Option<u64> {
    minutes
        .checked_mul(60_000)?
        .checked_add(seconds.checked_mul(1000)?)
}

/// `s.t` below a minute, `m:ss.t` below an hour, `h:mm:ss.t` above.
pub fn format_countdown(ms: u64) -> String {
    let hour = ms / 3_600_000;
    let minute = (ms / 60_000) % 60;
    let second = (ms / 1000) % 60;
    let tenth = (ms / 100) % 10;

    if ms > 3_600_000 {
        format!("{}:{:02}:{:02}.{}", hour, minute, second, tenth)
    } else if ms >= 60_000 {
        format!("{}:{:02}.{}", ms / 60_000, second, tenth)
    } else {
        format!("{}.{}", second, tenth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct TestClock(Rc<Cell<u64>>);

    impl TestClock {
        fn advance(&self, ms: u64) {
            self.0.set(self.0.get() + ms);
        }
    }

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    fn controller(interval_ms: u64) -> (TestClock, PlaybackController<TestClock>) {
        let clock = TestClock::default();
        clock.advance(50_000);
        let controller = PlaybackController::new(clock.clone(), interval_ms).unwrap();
        (clock, controller)
    }

    fn load(controller: &mut PlaybackController<TestClock>, url: &str) {
        let ticket = controller.advance().expect("advance at tail should fetch");
        assert!(controller.complete_fetch(ticket, Ok(url.to_string())));
    }

    #[test]
    fn starts_idle_and_paused() {
        let (_, c) = controller(5000);
        assert_eq!(c.state(), PlaybackState::Idle);
        assert_eq!(c.position(), None);
        assert_eq!(c.current_url(), None);
        assert!(!c.is_playing());
    }

    #[test]
    fn rejects_short_interval_at_construction() {
        let err = PlaybackController::new(TestClock::default(), 999).err().unwrap();
        assert_eq!(
            err,
            PlaybackError::InvalidInterval { requested_ms: 999, minimum_ms: 1000 }
        );
    }

    #[test]
    fn fetch_success_displays_new_tail() {
        let (_, mut c) = controller(5000);
        let ticket = c.fetch().unwrap();
        assert_eq!(c.state(), PlaybackState::Loading);
        assert!(c.complete_fetch(ticket, Ok("/images/a.png".to_string())));
        assert_eq!(c.state(), PlaybackState::Displayed);
        assert_eq!(c.position(), Some(0));
        assert_eq!(c.current_url(), Some("/images/a.png"));
    }

    #[test]
    fn repeated_advance_while_fetching_is_suppressed() {
        let (_, mut c) = controller(5000);
        let first = c.advance();
        assert!(first.is_some());
        assert_eq!(c.advance(), None);
        assert_eq!(c.advance(), None);
        assert_eq!(c.fetch(), None);
        assert!(c.complete_fetch(first.unwrap(), Ok("/images/a.png".to_string())));
        assert!(c.advance().is_some());
    }

    #[test]
    fn failed_fetch_leaves_history_alone() {
        let (_, mut c) = controller(5000);
        load(&mut c, "/images/a.png");

        let ticket = c.advance().unwrap();
        assert!(c.complete_fetch(ticket, Err(FetchError::Status(500))));
        assert_eq!(c.state(), PlaybackState::Error);
        assert_eq!(c.history().len(), 1);
        assert_eq!(c.position(), Some(0));
        assert!(c.last_error().unwrap().contains("500"));

        // retry
        let retry = c.advance().unwrap();
        assert_eq!(c.state(), PlaybackState::Loading);
        assert_eq!(c.last_error(), None);
        assert!(c.complete_fetch(retry, Ok("/images/b.png".to_string())));
        assert_eq!(c.position(), Some(1));
    }

    #[test]
    fn completion_for_unknown_ticket_is_ignored() {
        let (_, mut c) = controller(5000);
        let ticket = c.fetch().unwrap();
        assert!(c.complete_fetch(ticket, Ok("/images/a.png".to_string())));
        assert!(!c.complete_fetch(ticket, Ok("/images/b.png".to_string())));
        assert_eq!(c.history().len(), 1);
    }

    #[test]
    fn navigation_within_history_does_not_fetch() {
        let (_, mut c) = controller(5000);
        load(&mut c, "/images/a.png");
        load(&mut c, "/images/b.png");
        load(&mut c, "/images/c.png");

        assert!(c.retreat());
        assert!(c.retreat());
        assert_eq!(c.current_url(), Some("/images/a.png"));
        assert!(!c.retreat());
        assert_eq!(c.position(), Some(0));

        assert_eq!(c.advance(), None);
        assert_eq!(c.current_url(), Some("/images/b.png"));
        assert_eq!(c.state(), PlaybackState::Displayed);
        assert!(!c.is_fetching());
    }

    #[test]
    fn retreat_on_empty_history_is_noop() {
        let (_, mut c) = controller(5000);
        assert!(!c.retreat());
        assert_eq!(c.state(), PlaybackState::Idle);
    }

    #[test]
    fn full_history_evicts_oldest_on_advance() {
        let (_, mut c) = controller(5000);
        for i in 0..LIST_MAX {
            load(&mut c, &format!("/images/{}.png", i));
        }
        assert_eq!(c.history().len(), LIST_MAX);
        assert_eq!(c.position(), Some(LIST_MAX - 1));

        load(&mut c, "/images/new.png");
        assert_eq!(c.history().len(), LIST_MAX);
        assert_eq!(c.position(), Some(99));
        assert_eq!(c.history().get(0), Some("/images/1.png"));
        assert_eq!(c.current_url(), Some("/images/new.png"));
    }

    #[test]
    fn completion_after_navigation_still_appends() {
        let (_, mut c) = controller(5000);
        load(&mut c, "/images/a.png");
        load(&mut c, "/images/b.png");

        let ticket = c.advance().unwrap();
        assert!(c.retreat());
        assert_eq!(c.current_url(), Some("/images/a.png"));
        assert!(c.complete_fetch(ticket, Ok("/images/c.png".to_string())));
        assert_eq!(c.history().len(), 3);
        assert_eq!(c.current_url(), Some("/images/c.png"));
    }

    #[test]
    fn pause_and_resume_preserve_elapsed_time() {
        let (clock, mut c) = controller(10_000);
        load(&mut c, "/images/a.png");
        assert!(c.toggle_play());

        clock.advance(3000);
        assert!(!c.toggle_play());
        clock.advance(60_000);
        assert_eq!(c.countdown().remaining_ms, 7000);
        assert!(c.toggle_play());
        assert_eq!(c.countdown().remaining_ms, 7000);

        // many cycles with paused gaps in between
        for _ in 0..10 {
            clock.advance(100);
            c.toggle_play();
            clock.advance(5000);
            c.toggle_play();
        }
        assert_eq!(c.elapsed_ms(), 4000);
        assert_eq!(c.countdown().remaining_ms, 6000);
    }

    #[test]
    fn even_toggles_at_one_instant_change_nothing() {
        let (clock, mut c) = controller(10_000);
        load(&mut c, "/images/a.png");
        c.toggle_play();
        clock.advance(2500);
        let before = c.countdown();
        for _ in 0..4 {
            c.toggle_play();
        }
        assert!(c.is_playing());
        assert_eq!(c.countdown(), before);
    }

    #[test]
    fn tick_reports_progress_and_fetches_at_zero() {
        let (clock, mut c) = controller(1000);
        load(&mut c, "/images/a.png");
        c.toggle_play();

        clock.advance(400);
        assert_eq!(c.tick(), None);
        let countdown = c.last_countdown();
        assert_eq!(countdown.remaining_ms, 600);
        assert!((countdown.progress_percent - 40.0).abs() < 1e-9);

        clock.advance(600);
        let ticket = c.tick();
        assert!(ticket.is_some());
        assert_eq!(c.state(), PlaybackState::Loading);
        assert_eq!(c.last_countdown().remaining_ms, 1000);

        // the timer running out again while the fetch is pending does not issue another
        clock.advance(1000);
        assert_eq!(c.tick(), None);
    }

    #[test]
    fn tick_walks_cached_history_before_fetching() {
        let (clock, mut c) = controller(1000);
        load(&mut c, "/images/a.png");
        load(&mut c, "/images/b.png");
        c.retreat();
        c.toggle_play();

        clock.advance(1000);
        assert_eq!(c.tick(), None);
        assert_eq!(c.current_url(), Some("/images/b.png"));
        assert_eq!(c.elapsed_ms(), 0);

        clock.advance(1000);
        assert!(c.tick().is_some());
    }

    #[test]
    fn tick_while_paused_does_nothing() {
        let (clock, mut c) = controller(1000);
        load(&mut c, "/images/a.png");
        clock.advance(5000);
        assert_eq!(c.tick(), None);
        assert_eq!(c.countdown().remaining_ms, 1000);
    }

    #[test]
    fn set_interval_validates_and_resets_progress() {
        let (clock, mut c) = controller(10_000);
        load(&mut c, "/images/a.png");
        c.toggle_play();
        clock.advance(4000);

        assert_eq!(
            c.set_interval(500),
            Err(PlaybackError::InvalidInterval { requested_ms: 500, minimum_ms: 1000 })
        );
        assert_eq!(c.interval_ms(), 10_000);
        assert_eq!(c.countdown().elapsed_ms, 4000);

        assert_eq!(c.set_interval(1000), Ok(()));
        assert_eq!(c.interval_ms(), 1000);
        let countdown = c.countdown();
        assert_eq!(countdown.progress_percent, 0.0);
        assert_eq!(countdown.remaining_ms, 1000);
        assert_eq!(c.history().len(), 1);
        assert!(!c.is_fetching());
    }

    #[test]
    fn countdown_is_clamped() {
        let countdown = Countdown::derive(2500, 2000);
        assert_eq!(countdown.remaining_ms, 0);
        assert_eq!(countdown.progress_percent, 100.0);
    }

    #[test]
    fn history_window_evicts_front() {
        let mut history = History::new(2);
        assert_eq!(history.push("a".into()), None);
        assert_eq!(history.push("b".into()), None);
        assert_eq!(history.push("c".into()), Some("a".to_string()));
        assert_eq!(history.get(0), Some("b"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn formats_countdown_like_the_viewer() {
        assert_eq!(format_countdown(0), "0.0");
        assert_eq!(format_countdown(9_450), "9.4");
        assert_eq!(format_countdown(60_000), "1:00.0");
        assert_eq!(format_countdown(125_300), "2:05.3");
        assert_eq!(format_countdown(3_600_000), "60:00.0");
        assert_eq!(format_countdown(3_723_400), "1:02:03.4");
    }

    #[test]
    fn interval_parts_combine() {
        assert_eq!(interval_from_parts(2, 0), Some(DEFAULT_INTERVAL_MS));
        assert_eq!(interval_from_parts(0, 1), Some(MIN_INTERVAL_MS));
        assert_eq!(interval_from_parts(307_445_734_561_825_861, 0), None);
        assert_eq!(interval_from_parts(0, u64::MAX / 1000 + 1), None);
        assert_eq!(interval_from_parts(u64::MAX / 60_000, u64::MAX / 1000), None);
    }
}
