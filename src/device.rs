//! Keypad device facade
//!
//! A [`Keypad`] owns one transport and the eight buttons of the device. It
//! checks firmware compatibility, negotiates display capabilities, runs the
//! input loop and encodes LED and display commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use octokeyz_transport::{
    BoxedTransport, DeviceDescriptor, DeviceDiscovery, TransportError,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::button::{Button, ButtonHandler, ButtonId, ErrorSink, HandlerError};
use crate::codec::{
    decode_edges, encode_display_clear_delay, encode_display_line, input_bitmask,
    CapabilityFlags, DisplayGeometry, DisplayLine, DisplayLineAlign, EdgeKind, DISPLAY_LINES,
    FEATURE_CAPABILITIES, FEATURE_DISPLAY, OUTPUT_DISPLAY_CLEAR_DELAY, OUTPUT_DISPLAY_LINE,
    OUTPUT_LED,
};
use crate::config::DeviceIdentity;
use crate::error::{KeypadError, Result};
use crate::led::LedState;

/// Default read timeout of the listen loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pick one device out of an enumeration
///
/// # Arguments
/// * `devices` - Enumerated devices
/// * `serial_number` - Requested serial number; `None` or empty accepts a
///   single connected device
pub fn select_device(
    devices: Vec<DeviceDescriptor>,
    serial_number: Option<&str>,
) -> Result<DeviceDescriptor> {
    let serial_number = serial_number.filter(|s| !s.is_empty());

    if devices.is_empty() {
        return Err(KeypadError::NotFound {
            serial_number: serial_number.map(str::to_string),
        });
    }

    match serial_number {
        None => {
            if devices.len() > 1 {
                return Err(KeypadError::MoreThanOne {
                    serial_numbers: devices.into_iter().map(|d| d.serial_number).collect(),
                });
            }
            devices
                .into_iter()
                .next()
                .ok_or(KeypadError::NotFound { serial_number: None })
        }
        Some(serial) => devices
            .into_iter()
            .find(|d| d.serial_number == serial)
            .ok_or_else(|| KeypadError::NotFound {
                serial_number: Some(serial.to_string()),
            }),
    }
}

/// Capabilities negotiated at open time
#[derive(Debug, Clone, Copy, Default)]
struct Capabilities {
    /// Characters per display line; `None` without a display
    chars_per_line: Option<u8>,
    display_clear_delay: bool,
}

#[derive(Default)]
struct DeviceState {
    open: bool,
    legacy_led: bool,
    caps: Capabilities,
}

/// Marks the listen loop as gone when it exits
///
/// A stop request is consumed by the loop it stops, so the next listen
/// starts fresh.
struct ListeningGuard<'a> {
    listening: &'a AtomicBool,
    stop: &'a AtomicBool,
}

impl Drop for ListeningGuard<'_> {
    fn drop(&mut self) {
        self.stop.store(false, Ordering::SeqCst);
        self.listening.store(false, Ordering::SeqCst);
    }
}

/// One octokeyz or b8 keypad
pub struct Keypad {
    transport: BoxedTransport,
    identity: DeviceIdentity,
    buttons: [Arc<Button>; 8],
    state: Mutex<DeviceState>,
    /// Last input bitmask seen by the listen loop
    bitmask: Mutex<u8>,
    stop: AtomicBool,
    listening: AtomicBool,
    poll_interval: Duration,
}

impl Keypad {
    /// Wrap a (closed) transport
    pub fn new(transport: BoxedTransport, identity: DeviceIdentity) -> Self {
        Self {
            transport,
            identity,
            buttons: std::array::from_fn(|i| Button::new(ButtonId::from_bit(i as u8))),
            state: Mutex::new(DeviceState::default()),
            bitmask: Mutex::new(0),
            stop: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Read timeout of the listen loop, which bounds how long a stop
    /// request takes to be noticed
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Every connected keypad of the given model
    pub fn enumerate(
        discovery: &dyn DeviceDiscovery,
        identity: &DeviceIdentity,
    ) -> Result<Vec<Keypad>> {
        let devices = discovery.list_devices(&identity.filters())?;
        devices
            .iter()
            .map(|d| -> Result<Keypad> {
                let transport = discovery.transport_for(d)?;
                Ok(Keypad::new(transport, identity.clone()))
            })
            .collect()
    }

    /// The keypad with `serial_number`, or the only one connected
    pub fn get(
        discovery: &dyn DeviceDiscovery,
        identity: &DeviceIdentity,
        serial_number: Option<&str>,
    ) -> Result<Keypad> {
        let devices = discovery.list_devices(&identity.filters())?;
        let device = select_device(devices, serial_number)?;
        let transport = discovery.transport_for(&device)?;
        Ok(Keypad::new(transport, identity.clone()))
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.transport.descriptor()
    }

    pub fn serial_number(&self) -> &str {
        &self.descriptor().serial_number
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn has_display(&self) -> bool {
        self.state.lock().caps.chars_per_line.is_some()
    }

    /// Characters that fit in a display line, if the keypad has a display
    pub fn display_chars_per_line(&self) -> Option<u8> {
        self.state.lock().caps.chars_per_line
    }

    pub fn supports_display_clear_delay(&self) -> bool {
        self.state.lock().caps.display_clear_delay
    }

    pub fn button(&self, id: ButtonId) -> &Arc<Button> {
        &self.buttons[id.index()]
    }

    fn path(&self) -> String {
        self.descriptor().path.clone()
    }

    /// Open the keypad for exclusive use
    ///
    /// Checks the firmware interface version before touching the device,
    /// probes the capabilities and clears the display, if any.
    pub fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.open {
            return Err(KeypadError::IsOpen { path: self.path() });
        }

        let descriptor = self.descriptor();
        if descriptor.version_major() != self.identity.version_major {
            return Err(KeypadError::VersionIncompatible {
                version: descriptor.version,
                supported_major: self.identity.version_major,
            });
        }

        self.transport.open(true)?;

        let caps = match self.probe() {
            Ok(caps) => caps,
            Err(e) => {
                self.close_transport_after_failure();
                return Err(e);
            }
        };

        if let Some(cpl) = caps.chars_per_line {
            if let Err(e) = self.write_display_clear(cpl) {
                self.close_transport_after_failure();
                return Err(e);
            }
        }

        state.open = true;
        state.legacy_led = self.identity.legacy_led || descriptor.version_minor() < 1;
        state.caps = caps;
        *self.bitmask.lock() = 0;
        self.stop.store(false, Ordering::SeqCst);

        info!(
            "Opened {} (serial {}, firmware 0x{:04x}, display: {:?})",
            descriptor.path, descriptor.serial_number, descriptor.version, caps.chars_per_line
        );
        Ok(())
    }

    fn close_transport_after_failure(&self) {
        if let Err(e) = self.transport.close() {
            warn!("Failed to close {} after open failure: {}", self.path(), e);
        }
    }

    fn probe(&self) -> Result<Capabilities> {
        // Firmware without feature reports has no display
        let flags = match self.transport.get_feature_report(FEATURE_CAPABILITIES, 1) {
            Ok(payload) => CapabilityFlags::parse(&payload),
            Err(e) => {
                debug!("Capabilities not reported ({}), assuming no display", e);
                CapabilityFlags::default()
            }
        };
        debug!("Capabilities: {:?}", flags);

        if !flags.display {
            return Ok(Capabilities::default());
        }

        let payload = self.transport.get_feature_report(FEATURE_DISPLAY, 2)?;
        let geometry = DisplayGeometry::parse(&payload).ok_or_else(|| {
            KeypadError::ReadFailed(TransportError::FeatureReportFailed {
                path: self.path(),
                report_id: FEATURE_DISPLAY,
                reason: format!("expected 2 bytes, got {}", payload.len()),
            })
        })?;
        if geometry.lines != DISPLAY_LINES {
            return Err(KeypadError::DisplayBadNumberOfLines {
                lines: geometry.lines,
                expected: DISPLAY_LINES,
            });
        }
        debug!("Display: {:?}", geometry);

        Ok(Capabilities {
            chars_per_line: Some(geometry.chars_per_line),
            display_clear_delay: flags.display_clear_delay,
        })
    }

    /// Close the keypad
    ///
    /// Blanks the display and turns the LED off on a best-effort basis,
    /// stops the listen loop and releases the device. Closing a closed
    /// keypad does nothing. Handlers still waiting for a release stay
    /// blocked.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Ok(());
        }
        self.stop.store(true, Ordering::SeqCst);

        if let Some(cpl) = state.caps.chars_per_line {
            if let Err(e) = self.write_display_clear(cpl) {
                warn!("Failed to clear display on close: {}", e);
            }
        }
        if let Err(e) = self
            .transport
            .write_report(OUTPUT_LED, &[LedState::Off.encode(state.legacy_led)])
        {
            warn!("Failed to turn LED off on close: {}", e);
        }

        state.open = false;
        drop(state);

        self.transport.close()?;
        info!("Closed {}", self.path());
        Ok(())
    }

    /// Ask the running listen loop to return
    ///
    /// If no loop is running yet, the next [`Keypad::listen`] returns at once.
    pub fn stop_listening(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Register a handler for `button`
    ///
    /// Handlers run on their own thread for every press, in registration
    /// order.
    pub fn add_handler<B>(&self, button: B, handler: impl ButtonHandler) -> Result<()>
    where
        B: TryInto<ButtonId>,
        KeypadError: From<B::Error>,
    {
        let id = button.try_into()?;
        self.buttons[id.index()].add_handler(Arc::new(handler));
        Ok(())
    }

    /// Register a shared handler for `button`
    ///
    /// Fails with [`KeypadError::ButtonHandlerInvalid`] for `None`.
    pub fn add_shared_handler<B>(
        &self,
        button: B,
        handler: Option<Arc<dyn ButtonHandler>>,
    ) -> Result<()>
    where
        B: TryInto<ButtonId>,
        KeypadError: From<B::Error>,
    {
        let id = button.try_into()?;
        let handler = handler.ok_or(KeypadError::ButtonHandlerInvalid(id))?;
        self.buttons[id.index()].add_handler(handler);
        Ok(())
    }

    /// Run the input loop on the calling thread
    ///
    /// Returns `Ok` once stopped by [`Keypad::stop_listening`] or
    /// [`Keypad::close`], and an error if reading from the device fails.
    /// Handler failures go to `errors` if given, or to the log, and never
    /// end the loop.
    pub fn listen(&self, errors: Option<mpsc::Sender<HandlerError>>) -> Result<()> {
        if !self.is_open() {
            return Err(KeypadError::IsNotOpen { path: self.path() });
        }
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(KeypadError::AlreadyListening);
        }
        let _listening = ListeningGuard {
            listening: &self.listening,
            stop: &self.stop,
        };

        let sink = errors.map(ErrorSink::Channel).unwrap_or_default();
        debug!("Listening on {}", self.path());

        loop {
            if self.should_stop() {
                debug!("Stopped listening on {}", self.path());
                return Ok(());
            }

            let report = match self.transport.read_report(Some(self.poll_interval)) {
                Ok(Some(report)) => report,
                Ok(None) => continue,
                Err(e) => {
                    if self.should_stop() {
                        return Ok(());
                    }
                    return Err(e.into());
                }
            };

            let Some(current) = input_bitmask(&report) else {
                debug!("Ignoring report {} ({} bytes)", report.id, report.data.len());
                continue;
            };
            let at = Instant::now();

            let mut previous = self.bitmask.lock();
            if current == *previous {
                continue;
            }
            for edge in decode_edges(*previous, current, at) {
                let button = &self.buttons[edge.button.index()];
                match edge.kind {
                    EdgeKind::Pressed => button.press(edge.at, &sink),
                    EdgeKind::Released => button.release(edge.at),
                }
            }
            *previous = current;
        }
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || !self.is_open()
    }

    /// Set the LED state
    pub fn led(&self, state: LedState) -> Result<()> {
        let legacy = self.open_state()?.legacy_led;
        self.transport
            .write_report(OUTPUT_LED, &[state.encode(legacy)])?;
        debug!("LED {}", state);
        Ok(())
    }

    /// Draw `text` on a display line
    ///
    /// Text longer than the line is cut; shorter text blanks the rest.
    pub fn display_line(&self, line: DisplayLine, text: &str, align: DisplayLineAlign) -> Result<()> {
        let cpl = self.display_cpl()?;
        self.transport.write_report(
            OUTPUT_DISPLAY_LINE,
            &encode_display_line(line, text, align, cpl),
        )?;
        Ok(())
    }

    /// Blank one display line
    pub fn display_clear_line(&self, line: DisplayLine) -> Result<()> {
        self.display_line(line, "", DisplayLineAlign::Left)
    }

    /// Blank the whole display
    pub fn display_clear(&self) -> Result<()> {
        let cpl = self.display_cpl()?;
        self.write_display_clear(cpl)
    }

    /// Have the firmware blank the display after `delay`
    ///
    /// The delay saturates at 65535 ms.
    pub fn display_clear_with_delay(&self, delay: Duration) -> Result<()> {
        let state = self.open_state()?;
        if state.caps.chars_per_line.is_none() {
            return Err(KeypadError::DisplayNotSupported);
        }
        if !state.caps.display_clear_delay {
            return Err(KeypadError::DisplayDelayNotSupported);
        }

        let ms = u16::try_from(delay.as_millis()).unwrap_or(u16::MAX);
        self.transport
            .write_report(OUTPUT_DISPLAY_CLEAR_DELAY, &encode_display_clear_delay(ms))?;
        Ok(())
    }

    fn write_display_clear(&self, cpl: u8) -> Result<()> {
        for line in DisplayLine::all() {
            self.transport.write_report(
                OUTPUT_DISPLAY_LINE,
                &encode_display_line(line, "", DisplayLineAlign::Left, cpl),
            )?;
        }
        Ok(())
    }

    fn open_state(&self) -> Result<parking_lot::MutexGuard<'_, DeviceState>> {
        let state = self.state.lock();
        if !state.open {
            return Err(KeypadError::IsNotOpen { path: self.path() });
        }
        Ok(state)
    }

    fn display_cpl(&self) -> Result<u8> {
        self.open_state()?
            .caps
            .chars_per_line
            .ok_or(KeypadError::DisplayNotSupported)
    }
}

impl Drop for Keypad {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {}", self.path(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: 0x1d50,
            product_id: 0x6184,
            version: 0x0101,
            manufacturer: "rgm.io".into(),
            product: "octokeyz".into(),
            serial_number: serial.into(),
            path: format!("/dev/hidraw-{serial}"),
        }
    }

    #[test]
    fn test_select_none_connected() {
        let err = select_device(vec![], None).unwrap_err();
        assert!(matches!(err, KeypadError::NotFound { serial_number: None }));

        let err = select_device(vec![], Some("A1")).unwrap_err();
        assert!(
            matches!(err, KeypadError::NotFound { serial_number: Some(ref s) } if s == "A1")
        );
    }

    #[test]
    fn test_select_single_without_serial() {
        let d = select_device(vec![descriptor("A1")], None).unwrap();
        assert_eq!(d.serial_number, "A1");
        let d = select_device(vec![descriptor("A1")], Some("")).unwrap();
        assert_eq!(d.serial_number, "A1");
    }

    #[test]
    fn test_select_many_without_serial() {
        let err = select_device(vec![descriptor("S1"), descriptor("S2")], None).unwrap_err();
        match err {
            KeypadError::MoreThanOne { serial_numbers } => {
                assert_eq!(serial_numbers, vec!["S1".to_string(), "S2".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_select_by_serial() {
        let devices = vec![descriptor("S1"), descriptor("S2")];
        let d = select_device(devices.clone(), Some("S2")).unwrap();
        assert_eq!(d.path, "/dev/hidraw-S2");

        let err = select_device(devices, Some("S3")).unwrap_err();
        assert!(
            matches!(err, KeypadError::NotFound { serial_number: Some(ref s) } if s == "S3")
        );
    }
}
