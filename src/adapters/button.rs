//! Debounced button classifier with single, double and long click detection.
//!
//! ## Hardware
//!
//! Active-low momentary switch.  The button thread samples the level every
//! few milliseconds and feeds it to [`ButtonClassifier::update`]; a level
//! must hold for [`DEBOUNCE_MS`] before it counts.
//!
//! ## Gesture detection
//!
//! | Gesture      | Condition                                     | Click    |
//! |--------------|-----------------------------------------------|----------|
//! | Single click | Release before the long-click threshold       | `Single` |
//! | Double click | Second release within 350 ms of the first     | `Double` |
//! | Long click   | Held for 4 s (fires while still held)         | `Long`   |
//!
//! A single click is reported on the first release without waiting for a
//! possible second one, so a double click yields `Single` then `Double`.

use crate::app::commands::ButtonClick;

pub const DEBOUNCE_MS: u64 = 5;
pub const LONG_CLICK_MS: u64 = 4_000;
pub const DOUBLE_CLICK_WINDOW_MS: u64 = 350;

#[derive(Debug, Default)]
pub struct ButtonClassifier {
    stable_pressed: bool,
    candidate: Option<(bool, u64)>,
    pressed_at_ms: u64,
    long_fired: bool,
    first_release_ms: Option<u64>,
}

impl ButtonClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one level sample.  Returns a classified click, if any.
    pub fn update(&mut self, pressed: bool, now_ms: u64) -> Option<ButtonClick> {
        if let Some(first) = self.first_release_ms {
            if now_ms.saturating_sub(first) > DOUBLE_CLICK_WINDOW_MS {
                self.first_release_ms = None;
            }
        }

        if pressed != self.stable_pressed {
            match self.candidate {
                Some((level, since)) if level == pressed => {
                    if now_ms.saturating_sub(since) >= DEBOUNCE_MS {
                        self.candidate = None;
                        return self.on_stable_edge(pressed, now_ms);
                    }
                }
                _ => self.candidate = Some((pressed, now_ms)),
            }
        } else {
            self.candidate = None;
        }

        if self.stable_pressed
            && !self.long_fired
            && now_ms.saturating_sub(self.pressed_at_ms) >= LONG_CLICK_MS
        {
            self.long_fired = true;
            self.first_release_ms = None;
            return Some(ButtonClick::Long);
        }
        None
    }

    fn on_stable_edge(&mut self, pressed: bool, now_ms: u64) -> Option<ButtonClick> {
        self.stable_pressed = pressed;
        if pressed {
            self.pressed_at_ms = now_ms;
            self.long_fired = false;
            return None;
        }
        if self.long_fired {
            return None;
        }
        match self.first_release_ms.take() {
            Some(_) => Some(ButtonClick::Double),
            None => {
                self.first_release_ms = Some(now_ms);
                Some(ButtonClick::Single)
            }
        }
    }
}
