//! Modifier buttons
//!
//! A modifier is a button whose only job is to be held: other handlers
//! check [`Modifier::pressed`] to pick a secondary action.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::button::{ButtonHandler, Press};
use crate::error::KeypadError;

/// Shared "held" flag driven by one button at a time
#[derive(Default)]
pub struct Modifier {
    active: Mutex<()>,
    pressed: AtomicBool,
}

impl Modifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold the modifier for the duration of `press`
    ///
    /// Blocks until the press ends and returns its hold time. Fails at once
    /// with [`KeypadError::ModifierAlreadyActive`] if another press holds it.
    pub fn activate(&self, press: &Press) -> Result<Duration, KeypadError> {
        let Some(_active) = self.active.try_lock() else {
            return Err(KeypadError::ModifierAlreadyActive);
        };

        self.pressed.store(true, Ordering::SeqCst);
        debug!("Modifier held by {}", press.button_id());
        let held = press.wait_for_release();
        self.pressed.store(false, Ordering::SeqCst);
        Ok(held)
    }

    /// True while a button holds the modifier
    pub fn pressed(&self) -> bool {
        self.pressed.load(Ordering::SeqCst)
    }

    /// Handler to register on the modifier button
    pub fn handler(self: &Arc<Self>) -> impl ButtonHandler {
        let modifier = Arc::clone(self);
        move |press: &Press| -> anyhow::Result<()> {
            modifier.activate(press)?;
            Ok(())
        }
    }
}
