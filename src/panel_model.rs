//! Software model of the panel controller's memory interface.
//!
//! Decodes the same transfer stream the real panel receives (CASET/RASET
//! windows, RAMWR/RAMWRC pixel writes) into an RGB565 framebuffer. The
//! desktop simulator shows its contents in a window; tests read it back to
//! check what actually reached the screen.

use crate::config::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::geometry::ScreenSize;
use crate::panel::{CASET, RAMWR, RAMWRC, RASET};
use crate::scheduler::DcLine;

/// Counters over everything the model has decoded.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct PanelCounters {
    pub commands: u32,
    pub window_changes: u32,
    pub pixels_written: u32,
}

/// Framebuffer plus the controller's address window and write pointer.
pub struct PanelModel {
    screen: ScreenSize,
    pixels: [u16; SCREEN_WIDTH * SCREEN_HEIGHT],
    columns: (u16, u16),
    rows: (u16, u16),
    cursor: (u16, u16),
    command: Option<u8>,
    pending_byte: Option<u8>,
    counters: PanelCounters,
}

impl PanelModel {
    pub fn new(screen: ScreenSize) -> Self {
        Self {
            screen,
            pixels: [0; SCREEN_WIDTH * SCREEN_HEIGHT],
            columns: (0, screen.width - 1),
            rows: (0, screen.height - 1),
            cursor: (0, 0),
            command: None,
            pending_byte: None,
            counters: PanelCounters::default(),
        }
    }

    #[inline]
    pub fn screen(&self) -> ScreenSize { self.screen }

    #[inline]
    pub fn counters(&self) -> PanelCounters { self.counters }

    pub fn reset_counters(&mut self) { self.counters = PanelCounters::default(); }

    /// Native-order RGB565 value at (`x`, `y`).
    pub fn pixel(
        &self,
        x: u16,
        y: u16,
    ) -> u16 {
        self.pixels[usize::from(y) * usize::from(self.screen.width) + usize::from(x)]
    }

    /// One screen row in native order.
    pub fn row(
        &self,
        y: u16,
    ) -> &[u16] {
        let width = usize::from(self.screen.width);
        let start = usize::from(y) * width;
        &self.pixels[start..start + width]
    }

    /// Decode one transfer.
    pub fn apply(
        &mut self,
        line: DcLine,
        bytes: &[u8],
    ) {
        match line {
            DcLine::Command => {
                for &command in bytes {
                    self.command(command);
                }
            }
            DcLine::Data => self.data(bytes),
        }
    }

    fn command(
        &mut self,
        command: u8,
    ) {
        self.counters.commands += 1;
        self.pending_byte = None;
        if command == RAMWR {
            self.cursor = (self.columns.0, self.rows.0);
        }
        self.command = Some(command);
    }

    fn data(
        &mut self,
        bytes: &[u8],
    ) {
        match self.command {
            Some(CASET) => {
                self.columns = Self::range(bytes, self.columns);
                self.counters.window_changes += 1;
            }
            Some(RASET) => {
                self.rows = Self::range(bytes, self.rows);
                self.counters.window_changes += 1;
            }
            Some(RAMWR | RAMWRC) => {
                for &byte in bytes {
                    match self.pending_byte.take() {
                        Some(high) => self.put(u16::from_be_bytes([high, byte])),
                        None => self.pending_byte = Some(byte),
                    }
                }
            }
            _ => {}
        }
    }

    /// Parse a 2-byte (start only) or 4-byte (start and end) address range.
    fn range(
        bytes: &[u8],
        current: (u16, u16),
    ) -> (u16, u16) {
        match *bytes {
            [s0, s1, e0, e1, ..] => (u16::from_be_bytes([s0, s1]), u16::from_be_bytes([e0, e1])),
            [s0, s1] => (u16::from_be_bytes([s0, s1]), current.1),
            _ => current,
        }
    }

    fn put(
        &mut self,
        color: u16,
    ) {
        let (x, y) = self.cursor;
        if x < self.screen.width && y < self.screen.height {
            self.pixels[usize::from(y) * usize::from(self.screen.width) + usize::from(x)] = color;
        }
        self.counters.pixels_written += 1;

        // Row-major advance inside the window, wrapping back to the top.
        if x >= self.columns.1 {
            self.cursor.0 = self.columns.0;
            self.cursor.1 = if y >= self.rows.1 { self.rows.0 } else { y + 1 };
        } else {
            self.cursor.0 = x + 1;
        }
    }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_write_wraps_rows() {
        let mut model = PanelModel::new(ScreenSize::new(8, 4));
        model.apply(DcLine::Command, &[CASET]);
        model.apply(DcLine::Data, &[0, 2, 0, 3]);
        model.apply(DcLine::Command, &[RASET]);
        model.apply(DcLine::Data, &[0, 1, 0, 3]);
        model.apply(DcLine::Command, &[RAMWR]);
        model.apply(DcLine::Data, &[0, 1, 0, 2, 0, 3]);

        assert_eq!(model.pixel(2, 1), 1);
        assert_eq!(model.pixel(3, 1), 2);
        assert_eq!(model.pixel(2, 2), 3);
        assert_eq!(model.counters().pixels_written, 3);
    }

    #[test]
    fn test_short_range_keeps_end() {
        let mut model = PanelModel::new(ScreenSize::new(8, 4));
        model.apply(DcLine::Command, &[CASET]);
        model.apply(DcLine::Data, &[0, 1, 0, 2]);
        model.apply(DcLine::Command, &[CASET]);
        model.apply(DcLine::Data, &[0, 0]);
        model.apply(DcLine::Command, &[RAMWR]);
        model.apply(DcLine::Data, &[0, 9, 0, 9, 0, 9, 0, 7]);

        assert_eq!(model.row(0)[..3], [9, 9, 9]);
        assert_eq!(model.pixel(0, 1), 7);
    }

    #[test]
    fn test_continue_does_not_reset_cursor() {
        let mut model = PanelModel::new(ScreenSize::new(4, 4));
        model.apply(DcLine::Command, &[RAMWR]);
        model.apply(DcLine::Data, &[0, 5]);
        model.apply(DcLine::Command, &[RAMWRC]);
        model.apply(DcLine::Data, &[0, 6]);

        assert_eq!(model.row(0)[..2], [5, 6]);
    }
}
