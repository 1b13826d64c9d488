//! Host driver for octokeyz and b8 USB macropads
//!
//! The keypad reports its eight buttons as a bitmask input report. This
//! crate turns bitmask changes into press/release edges, runs user
//! handlers on their own threads and drives the LED and the optional
//! 8-line character display.
//!
//! ```no_run
//! use octokeyz::{ButtonId, DeviceIdentity, Keypad, Press};
//!
//! # fn main() -> anyhow::Result<()> {
//! let discovery = octokeyz_transport::default_discovery();
//! let keypad = Keypad::get(discovery.as_ref(), &DeviceIdentity::octokeyz(), None)?;
//! keypad.open()?;
//! keypad.add_handler(ButtonId::BUTTON_1, |press: &Press| -> anyhow::Result<()> {
//!     let held = press.wait_for_release();
//!     println!("{} held for {:?}", press.button_id(), held);
//!     Ok(())
//! })?;
//! keypad.listen(None)?;
//! # Ok(())
//! # }
//! ```

pub mod button;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod led;
pub mod modifier;

pub use button::{Button, ButtonHandler, ButtonId, HandlerError, Press, BUTTON_COUNT};
pub use codec::{DisplayLine, DisplayLineAlign};
pub use config::{DeviceIdentity, KeypadConfig};
pub use device::{select_device, Keypad, DEFAULT_POLL_INTERVAL};
pub use error::{ErrorKind, KeypadError, Result};
pub use led::LedState;
pub use modifier::Modifier;
