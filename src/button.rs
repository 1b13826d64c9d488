//! Buttons, press cycles and handler dispatch
//!
//! Each press edge starts a new *press cycle* on its button and runs every
//! registered handler on its own thread. Handlers get a [`Press`] bound to
//! that cycle, so waiting for release always observes the release of the
//! press that started them, never a later one.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::KeypadError;

/// Number of buttons on every supported keypad
pub const BUTTON_COUNT: usize = 8;

/// Button identifier, 1 to 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ButtonId(u8);

impl ButtonId {
    pub const BUTTON_1: Self = Self(1);
    pub const BUTTON_2: Self = Self(2);
    pub const BUTTON_3: Self = Self(3);
    pub const BUTTON_4: Self = Self(4);
    pub const BUTTON_5: Self = Self(5);
    pub const BUTTON_6: Self = Self(6);
    pub const BUTTON_7: Self = Self(7);
    pub const BUTTON_8: Self = Self(8);

    pub fn new(id: u8) -> Result<Self, KeypadError> {
        if (1..=BUTTON_COUNT as u8).contains(&id) {
            Ok(Self(id))
        } else {
            Err(KeypadError::ButtonInvalid(id))
        }
    }

    /// Button reported by bit `bit` (0-7) of the input bitmask
    pub(crate) fn from_bit(bit: u8) -> Self {
        Self((bit & 0x07) + 1)
    }

    /// All buttons in order
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=BUTTON_COUNT as u8).map(Self)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

impl TryFrom<u8> for ButtonId {
    type Error = KeypadError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BUTTON_{}", self.0)
    }
}

/// Callback run on its own thread whenever a button is pressed
///
/// Closures taking `&Press` and returning `anyhow::Result<()>` implement
/// this trait.
pub trait ButtonHandler: Send + Sync + 'static {
    fn handle(&self, press: &Press) -> anyhow::Result<()>;
}

impl<F> ButtonHandler for F
where
    F: Fn(&Press) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, press: &Press) -> anyhow::Result<()> {
        self(press)
    }
}

/// Failure returned by a button handler
#[derive(Error, Debug)]
#[error("{button} handler failed: {error:#}")]
pub struct HandlerError {
    pub button: ButtonId,
    pub error: anyhow::Error,
}

/// Where handler failures go
#[derive(Clone, Default)]
pub(crate) enum ErrorSink {
    Channel(mpsc::Sender<HandlerError>),
    #[default]
    Log,
}

impl ErrorSink {
    /// Deliver without blocking, falling back to the log
    pub(crate) fn report(&self, err: HandlerError) {
        match self {
            ErrorSink::Channel(tx) => match tx.try_send(err) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(err)) => {
                    warn!("Handler error channel is full, logging instead");
                    error!("{}", err);
                }
                Err(mpsc::error::TrySendError::Closed(err)) => {
                    error!("{}", err);
                }
            },
            ErrorSink::Log => error!("{}", err),
        }
    }
}

/// Release notification for one press cycle
struct ReleaseSignal {
    duration: Mutex<Option<Duration>>,
    released: Condvar,
}

impl ReleaseSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            duration: Mutex::new(None),
            released: Condvar::new(),
        })
    }

    /// Record the hold duration and wake every waiter; later calls are ignored
    fn notify(&self, duration: Duration) {
        let mut d = self.duration.lock();
        if d.is_none() {
            *d = Some(duration);
        }
        self.released.notify_all();
    }

    fn get(&self) -> Option<Duration> {
        *self.duration.lock()
    }

    fn wait(&self) -> Duration {
        let mut d = self.duration.lock();
        loop {
            if let Some(duration) = *d {
                return duration;
            }
            self.released.wait(&mut d);
        }
    }
}

struct ButtonState {
    pressed_at: Option<Instant>,
    released_at: Option<Instant>,
    duration: Option<Duration>,
    signal: Arc<ReleaseSignal>,
    cycle: u64,
}

/// One physical button
pub struct Button {
    id: ButtonId,
    handlers: Mutex<Vec<Arc<dyn ButtonHandler>>>,
    state: Mutex<ButtonState>,
}

impl Button {
    pub(crate) fn new(id: ButtonId) -> Arc<Self> {
        Arc::new(Self {
            id,
            handlers: Mutex::new(Vec::new()),
            state: Mutex::new(ButtonState {
                pressed_at: None,
                released_at: None,
                duration: None,
                signal: ReleaseSignal::new(),
                cycle: 0,
            }),
        })
    }

    pub fn id(&self) -> ButtonId {
        self.id
    }

    pub fn is_pressed(&self) -> bool {
        self.state.lock().pressed_at.is_some()
    }

    /// Start of the current press, if held
    pub fn pressed_at(&self) -> Option<Instant> {
        self.state.lock().pressed_at
    }

    /// End of the last completed press
    pub fn released_at(&self) -> Option<Instant> {
        self.state.lock().released_at
    }

    /// Hold time of the last completed press
    pub fn last_duration(&self) -> Option<Duration> {
        self.state.lock().duration
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    pub(crate) fn add_handler(&self, handler: Arc<dyn ButtonHandler>) {
        self.handlers.lock().push(handler);
    }

    /// Handle a press edge
    ///
    /// Starts a new cycle and spawns one thread per handler, in
    /// registration order. Never waits for the handlers.
    pub(crate) fn press(self: &Arc<Self>, at: Instant, sink: &ErrorSink) {
        let press = {
            let mut state = self.state.lock();
            if let Some(previous) = state.pressed_at {
                // Pressed again without a release in between
                debug!("{} pressed while held, ending previous cycle", self.id);
                state.signal.notify(at.saturating_duration_since(previous));
            }

            state.pressed_at = Some(at);
            state.released_at = None;
            state.duration = None;
            state.signal = ReleaseSignal::new();
            state.cycle += 1;

            Press {
                button: self.clone(),
                signal: state.signal.clone(),
                pressed_at: at,
                cycle: state.cycle,
            }
        };
        debug!("{} pressed (cycle {})", self.id, press.cycle);

        let handlers = self.handlers.lock().clone();
        for (i, handler) in handlers.into_iter().enumerate() {
            let press = press.clone();
            let handler_sink = sink.clone();
            let spawned = thread::Builder::new()
                .name(format!("btn{}-handler{}", self.id.get(), i))
                .spawn(move || {
                    if let Err(error) = handler.handle(&press) {
                        handler_sink.report(HandlerError {
                            button: press.button_id(),
                            error,
                        });
                    }
                });

            if let Err(e) = spawned {
                sink.report(HandlerError {
                    button: self.id,
                    error: anyhow::Error::new(e).context("failed to spawn handler thread"),
                });
            }
        }
    }

    /// Handle a release edge; ignored unless pressed
    pub(crate) fn release(&self, at: Instant) {
        let mut state = self.state.lock();
        let Some(pressed_at) = state.pressed_at.take() else {
            return;
        };

        let duration = at.saturating_duration_since(pressed_at);
        state.released_at = Some(at);
        state.duration = Some(duration);
        state.signal.notify(duration);
        debug!("{} released after {:?}", self.id, duration);
    }
}

/// Context handed to a handler for one press cycle
#[derive(Clone)]
pub struct Press {
    button: Arc<Button>,
    signal: Arc<ReleaseSignal>,
    pressed_at: Instant,
    cycle: u64,
}

impl Press {
    pub fn button(&self) -> &Button {
        &self.button
    }

    pub fn button_id(&self) -> ButtonId {
        self.button.id
    }

    pub fn pressed_at(&self) -> Instant {
        self.pressed_at
    }

    /// Cycle number on this button, starting at 1
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Block until this press ends, returning how long it was held
    ///
    /// Returns at once if it already ended. A press ends on release, or
    /// when the button is pressed again before a release arrives.
    pub fn wait_for_release(&self) -> Duration {
        self.signal.wait()
    }

    /// Hold time, if this press already ended
    pub fn duration(&self) -> Option<Duration> {
        self.signal.get()
    }
}

impl fmt::Debug for Press {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Press")
            .field("button", &self.button.id)
            .field("cycle", &self.cycle)
            .field("pressed_at", &self.pressed_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn recording_handler(tx: std_mpsc::Sender<Press>) -> Arc<dyn ButtonHandler> {
        let tx = Mutex::new(tx);
        Arc::new(move |press: &Press| -> anyhow::Result<()> {
            tx.lock().send(press.clone())?;
            Ok(())
        })
    }

    #[test]
    fn test_button_id_range() {
        assert!(ButtonId::new(0).is_err());
        assert!(ButtonId::new(9).is_err());
        assert_eq!(ButtonId::new(8).unwrap(), ButtonId::BUTTON_8);
        assert_eq!(ButtonId::from_bit(0), ButtonId::BUTTON_1);
        assert_eq!(ButtonId::BUTTON_3.to_string(), "BUTTON_3");
        assert_eq!(ButtonId::all().count(), BUTTON_COUNT);
    }

    #[test]
    fn test_release_duration() {
        let button = Button::new(ButtonId::BUTTON_1);
        let (tx, rx) = std_mpsc::channel();
        button.add_handler(recording_handler(tx));

        let t0 = Instant::now();
        button.press(t0, &ErrorSink::Log);
        let press = rx.recv_timeout(WAIT).unwrap();
        assert!(button.is_pressed());
        assert_eq!(press.duration(), None);

        button.release(t0 + Duration::from_millis(250));
        assert_eq!(press.wait_for_release(), Duration::from_millis(250));
        assert!(!button.is_pressed());
        assert_eq!(button.last_duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let button = Button::new(ButtonId::BUTTON_2);
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        button.add_handler(Arc::new(move |press: &Press| -> anyhow::Result<()> {
            let held = press.wait_for_release();
            tx.lock().send(held)?;
            Ok(())
        }));

        let t0 = Instant::now();
        button.press(t0, &ErrorSink::Log);
        std::thread::sleep(Duration::from_millis(20));
        button.release(t0 + Duration::from_millis(40));

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Duration::from_millis(40));
    }

    #[test]
    fn test_cycles_are_isolated() {
        let button = Button::new(ButtonId::BUTTON_1);
        let (tx, rx) = std_mpsc::channel();
        button.add_handler(recording_handler(tx));

        let t0 = Instant::now();
        button.press(t0, &ErrorSink::Log);
        button.release(t0 + Duration::from_millis(10));
        let first = rx.recv_timeout(WAIT).unwrap();

        button.press(t0 + Duration::from_millis(100), &ErrorSink::Log);
        let second = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(first.cycle() + 1, second.cycle());

        // The old cycle keeps its own duration; the new one is still held
        assert_eq!(first.wait_for_release(), Duration::from_millis(10));
        assert_eq!(second.duration(), None);

        button.release(t0 + Duration::from_millis(400));
        assert_eq!(second.wait_for_release(), Duration::from_millis(300));
        assert_eq!(first.duration(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_bounce_ends_previous_cycle() {
        let button = Button::new(ButtonId::BUTTON_4);
        let (tx, rx) = std_mpsc::channel();
        button.add_handler(recording_handler(tx));

        let t0 = Instant::now();
        button.press(t0, &ErrorSink::Log);
        let first = rx.recv_timeout(WAIT).unwrap();

        button.press(t0 + Duration::from_millis(30), &ErrorSink::Log);
        let second = rx.recv_timeout(WAIT).unwrap();

        assert_eq!(first.wait_for_release(), Duration::from_millis(30));
        assert!(button.is_pressed());
        assert_eq!(second.duration(), None);
        assert_eq!(button.pressed_at(), Some(t0 + Duration::from_millis(30)));
    }

    #[test]
    fn test_release_while_released_is_ignored() {
        let button = Button::new(ButtonId::BUTTON_1);
        button.release(Instant::now());
        assert!(!button.is_pressed());
        assert_eq!(button.last_duration(), None);
        assert_eq!(button.released_at(), None);
    }

    #[test]
    fn test_handler_error_reaches_channel() {
        let button = Button::new(ButtonId::BUTTON_5);
        button.add_handler(Arc::new(|_: &Press| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }));

        let (tx, mut rx) = mpsc::channel(4);
        button.press(Instant::now(), &ErrorSink::Channel(tx));

        let err = rx.blocking_recv().unwrap();
        assert_eq!(err.button, ButtonId::BUTTON_5);
        assert_eq!(err.to_string(), "BUTTON_5 handler failed: boom");
    }

    #[test]
    fn test_full_channel_does_not_block() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ErrorSink::Channel(tx);
        for _ in 0..3 {
            sink.report(HandlerError {
                button: ButtonId::BUTTON_1,
                error: anyhow::anyhow!("late"),
            });
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_every_handler_runs() {
        let button = Button::new(ButtonId::BUTTON_6);
        let (tx, rx) = std_mpsc::channel();
        for _ in 0..3 {
            button.add_handler(recording_handler(tx.clone()));
        }
        assert_eq!(button.handler_count(), 3);

        button.press(Instant::now(), &ErrorSink::Log);
        for _ in 0..3 {
            let press = rx.recv_timeout(WAIT).unwrap();
            assert_eq!(press.button_id(), ButtonId::BUTTON_6);
            assert_eq!(press.cycle(), 1);
        }
    }
}
