//! Seven-segment display adapter.
//!
//! The four-digit panel is write-only.  This adapter renders every frame
//! to the log and keeps the last one, which is what the host simulation
//! and the serial console show.

use crate::app::ports::{DisplayPort, Glyph};
use log::debug;

/// One rendered display frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Blank,
    Digits {
        digits: [u8; 4],
        brightness: u8,
        dot: Option<u8>,
    },
    Glyph {
        glyph: Glyph,
        brightness: u8,
    },
}

/// Text shown for a canned message.
pub fn glyph_text(glyph: Glyph) -> &'static str {
    match glyph {
        Glyph::Ready => "rdy ",
        Glyph::Error => "Err ",
        Glyph::Calibrating => "CAL ",
    }
}

/// Render digits as panel text, e.g. `12.34`.
pub fn digits_text(digits: [u8; 4], dot: Option<u8>) -> heapless::String<8> {
    let mut out = heapless::String::new();
    for (i, d) in digits.iter().enumerate() {
        let _ = out.push(char::from(b'0' + d.min(&9)));
        if dot == Some(i as u8) {
            let _ = out.push('.');
        }
    }
    out
}

pub struct LogDisplay {
    last: Frame,
}

impl Default for LogDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl LogDisplay {
    pub fn new() -> Self {
        Self { last: Frame::Blank }
    }

    pub fn last_frame(&self) -> Frame {
        self.last
    }
}

impl DisplayPort for LogDisplay {
    fn show_digits(&mut self, digits: [u8; 4], brightness: u8, dot: Option<u8>) {
        let frame = Frame::Digits {
            digits,
            brightness,
            dot,
        };
        if frame != self.last {
            debug!("DISPLAY: [{}] @{}", digits_text(digits, dot), brightness);
            self.last = frame;
        }
    }

    fn show_glyph(&mut self, glyph: Glyph, brightness: u8) {
        debug!("DISPLAY: [{}] @{}", glyph_text(glyph), brightness);
        self.last = Frame::Glyph { glyph, brightness };
    }

    fn clear(&mut self) {
        debug!("DISPLAY: blank");
        self.last = Frame::Blank;
    }
}
