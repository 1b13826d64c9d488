//! Command handlers for the octokeyz binary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use octokeyz_transport::{default_discovery, DeviceDescriptor};
use tokio::sync::mpsc;
use tracing::{info, warn};

use octokeyz::{
    ButtonId, DeviceIdentity, DisplayLine, DisplayLineAlign, HandlerError, Keypad, KeypadConfig,
    LedState, Press,
};

/// Resolved device selection
pub struct Target {
    pub identity: DeviceIdentity,
    pub serial_number: Option<String>,
    pub poll_interval: Duration,
    pub error_capacity: usize,
}

impl Target {
    pub fn new(config: KeypadConfig, serial: Option<String>, legacy_b8: bool) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            error_capacity: config.handler_error_capacity.max(1),
            serial_number: serial.or(config.serial_number),
            identity: if legacy_b8 {
                DeviceIdentity::b8()
            } else {
                config.identity
            },
        }
    }

    fn open(&self) -> Result<Keypad> {
        let discovery = default_discovery();
        let keypad = Keypad::get(
            discovery.as_ref(),
            &self.identity,
            self.serial_number.as_deref(),
        )?
        .with_poll_interval(self.poll_interval);
        keypad
            .open()
            .with_context(|| format!("Failed to open {}", keypad.descriptor().path))?;
        Ok(keypad)
    }
}

/// Set up a Ctrl-C handler that sets the given flag to false when triggered.
/// Returns the Arc<AtomicBool> for use in the main loop.
fn setup_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    Ok(running)
}

fn wait_for_interrupt() -> Result<()> {
    let running = setup_interrupt_handler()?;
    println!("Press Ctrl+C to exit");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}

fn format_device(d: &DeviceDescriptor) -> String {
    format!(
        "{:<16} {:04x}:{:04x}  v{:x}.{:02x}  {} {}  {}",
        if d.serial_number.is_empty() {
            "-"
        } else {
            d.serial_number.as_str()
        },
        d.vendor_id,
        d.product_id,
        d.version_major(),
        d.version_minor(),
        d.manufacturer,
        d.product,
        d.path
    )
}

pub fn list(target: &Target, json: bool) -> Result<()> {
    let devices = default_discovery().list_devices(&target.identity.filters())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No {} keypad found", target.identity.product);
        return Ok(());
    }
    for d in &devices {
        println!("{}", format_device(d));
    }
    Ok(())
}

/// The LED is turned off again when the keypad is closed, so the state is
/// held until interrupted
pub fn led(target: &Target, state: LedState) -> Result<()> {
    let keypad = target.open()?;
    keypad.led(state)?;
    info!("LED set to {}", state);
    wait_for_interrupt()?;
    keypad.close()?;
    Ok(())
}

pub fn display(target: &Target, line: u8, text: &str, align: DisplayLineAlign) -> Result<()> {
    let line = DisplayLine::new(line)?;
    let keypad = target.open()?;
    keypad.display_line(line, text, align)?;
    wait_for_interrupt()?;
    keypad.close()?;
    Ok(())
}

pub fn clear(target: &Target, line: Option<u8>, delay_ms: Option<u16>) -> Result<()> {
    let keypad = target.open()?;

    match (line, delay_ms) {
        (Some(line), _) => keypad.display_clear_line(DisplayLine::new(line)?)?,
        (None, Some(ms)) => {
            let delay = Duration::from_millis(ms.into());
            keypad.display_clear_with_delay(delay)?;
            info!("Display clears in {} ms", ms);
            std::thread::sleep(delay);
        }
        (None, None) => keypad.display_clear()?,
    }

    keypad.close()?;
    Ok(())
}

/// Handler that logs a press and mirrors it on the display
fn press_logger(keypad: Weak<Keypad>) -> impl Fn(&Press) -> Result<()> + Send + Sync + 'static {
    move |press: &Press| -> Result<()> {
        let id = press.button_id();
        info!("{} pressed", id);
        show(&keypad, id, &format!("{id} pressed"))?;

        let held = press.wait_for_release();
        info!("{} released after {} ms", id, held.as_millis());
        show(&keypad, id, &format!("{id} {} ms", held.as_millis()))?;
        Ok(())
    }
}

fn show(keypad: &Weak<Keypad>, id: ButtonId, text: &str) -> Result<()> {
    let Some(keypad) = keypad.upgrade() else {
        return Ok(());
    };
    if !keypad.has_display() {
        return Ok(());
    }
    let line = DisplayLine::new(id.get())?;
    keypad.display_line(line, text, DisplayLineAlign::Left)?;
    Ok(())
}

pub fn listen(target: &Target) -> Result<()> {
    let keypad = Arc::new(target.open()?);
    keypad.led(LedState::On)?;

    for id in ButtonId::all() {
        keypad.add_handler(id, press_logger(Arc::downgrade(&keypad)))?;
    }

    // Runs until every sender is gone, which may be never if a handler is
    // still waiting for a release at exit
    let (tx, mut rx) = mpsc::channel::<HandlerError>(target.error_capacity);
    std::thread::Builder::new()
        .name("handler-errors".into())
        .spawn(move || {
            while let Some(err) = rx.blocking_recv() {
                warn!("{}", err);
            }
        })
        .context("Failed to spawn error logger thread")?;

    let stopper = Arc::clone(&keypad);
    ctrlc::set_handler(move || stopper.stop_listening())
        .context("Failed to set Ctrl+C handler")?;

    info!(
        "Listening on {} (serial {}), press Ctrl+C to exit",
        keypad.descriptor().path,
        keypad.serial_number()
    );
    let result = keypad.listen(Some(tx));

    keypad.close()?;
    result?;
    Ok(())
}
