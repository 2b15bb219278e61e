//! Panel command layer on top of the [`BusScheduler`].
//!
//! Opens address windows with CASET/RASET/RAMWR and streams filled line
//! buffers into them. The last window is cached so consecutive writes only
//! send the edges that actually moved.

use core::cell::Cell;

use critical_section::Mutex;

use crate::clock::Clock;
use crate::error::PipelineError;
use crate::geometry::ScreenSize;
use crate::pool::BufferSlot;
use crate::scheduler::{Bus, BusScheduler};

// ST7789 / ILI9341 commands
pub const CASET: u8 = 0x2A;
pub const RASET: u8 = 0x2B;
pub const RAMWR: u8 = 0x2C;
pub const RAMWRC: u8 = 0x3C;

/// Last address window sent to the panel, in screen coordinates.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Window {
    left: i32,
    right: i32,
    top: i32,
    bottom: i32,
}

impl Window {
    const UNKNOWN: Self = Self { left: -1, right: -1, top: -1, bottom: -1 };
}

/// Commands needed to move from the cached window to a new one.
#[derive(Clone, Copy, Default)]
struct WindowUpdate {
    columns: Option<(u16, Option<u16>)>,
    rows: Option<(u16, Option<u16>)>,
}

/// ST7789-style panel reached through the Bus Scheduler.
pub struct Panel<'a, B, C> {
    scheduler: BusScheduler<'a, B, C>,
    screen: ScreenSize,
    window: Mutex<Cell<Window>>,
}

impl<'a, B, C> Panel<'a, B, C>
where
    B: Bus<'a>,
    C: Clock,
{
    pub fn new(
        scheduler: BusScheduler<'a, B, C>,
        screen: ScreenSize,
    ) -> Self {
        Self {
            scheduler,
            screen,
            window: Mutex::new(Cell::new(Window::UNKNOWN)),
        }
    }

    #[inline]
    pub fn scheduler(&self) -> &BusScheduler<'a, B, C> { &self.scheduler }

    #[inline]
    pub fn screen(&self) -> ScreenSize { self.screen }

    /// Forget the cached window so the next write sends both edges again.
    pub fn invalidate_window(&self) { critical_section::with(|cs| self.window.borrow(cs).set(Window::UNKNOWN)); }

    /// Open a window at (`left`, `top`) that is `width` pixels wide.
    ///
    /// The window always runs to the bottom of the screen; the pixel stream
    /// decides how many rows are written. A one-row write widens the right
    /// edge to the cached one or to the screen edge, because the panel would
    /// otherwise wrap inside a stale window.
    pub fn begin_write(
        &self,
        left: u16,
        top: u16,
        width: u16,
        height: u16,
    ) -> Result<(), PipelineError> {
        let update = critical_section::with(|cs| {
            let cell = self.window.borrow(cs);
            let last = cell.get();

            let mut right = i32::from(left) + i32::from(width) - 1;
            let bottom = i32::from(self.screen.height) - 1;
            if height == 1 {
                right = if last.right > right { last.right } else { i32::from(self.screen.width) - 1 };
            }

            let mut update = WindowUpdate::default();
            let mut next = last;
            if i32::from(left) != last.left || right != last.right {
                let end = (right != last.right).then_some(right as u16);
                update.columns = Some((left, end));
                next.left = i32::from(left);
                next.right = right;
            }
            if i32::from(top) != last.top || bottom != last.bottom {
                let end = (bottom != last.bottom).then_some(bottom as u16);
                update.rows = Some((top, end));
                next.top = i32::from(top);
                next.bottom = bottom;
            }
            cell.set(next);
            update
        });

        if let Some((start, end)) = update.columns {
            self.set_range(CASET, start, end)?;
        }
        if let Some((start, end)) = update.rows {
            self.set_range(RASET, start, end)?;
        }
        self.scheduler.command(RAMWR)?;
        if height > 1 {
            self.scheduler.command(RAMWRC)?;
        }
        Ok(())
    }

    /// Send an address-set command with a start and, if it moved, an end.
    fn set_range(
        &self,
        command: u8,
        start: u16,
        end: Option<u16>,
    ) -> Result<(), PipelineError> {
        self.scheduler.command(command)?;
        let [s0, s1] = start.to_be_bytes();
        match end {
            Some(end) => {
                let [e0, e1] = end.to_be_bytes();
                self.scheduler.data(&[s0, s1, e0, e1])
            }
            None => self.scheduler.data(&[s0, s1]),
        }
    }

    /// Borrow a line buffer for the next burst.
    #[inline]
    pub fn acquire_buffer(&self) -> Result<BufferSlot<'a>, PipelineError> { self.scheduler.acquire_buffer() }

    /// Stream `rows` rows of `width` pixels from a filled buffer.
    pub fn write_rows(
        &self,
        buffer: BufferSlot<'a>,
        width: u16,
        rows: u16,
    ) -> Result<(), PipelineError> {
        self.scheduler.send_pixels(buffer, usize::from(width) * usize::from(rows))
    }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus_lock::BusLock;
    use crate::scheduler::{DcLine, DmaPools};
    use crate::testing::{RecordingBus, StdClock, with_completions};

    type TestPanel<'a> = Panel<'a, RecordingBus, StdClock>;

    /// Run `f` with completions flowing and return every transfer it caused.
    fn sent(
        panel: &TestPanel<'_>,
        f: impl FnOnce(&TestPanel<'_>),
    ) -> Vec<(DcLine, Vec<u8>)> {
        let scheduler = panel.scheduler();
        with_completions(
            scheduler.bus(),
            |id, len| scheduler.complete(id, len).unwrap(),
            || {
                f(panel);
                scheduler.drain().unwrap();
            },
        );
        scheduler.bus().take_completed().into_iter().map(|t| (t.line, t.bytes)).collect()
    }

    #[test]
    fn test_first_write_sends_full_window() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let panel = Panel::new(
            BusScheduler::new(RecordingBus::new(), StdClock::new(), &pools, &lock),
            ScreenSize::PANEL,
        );

        assert_eq!(
            sent(&panel, |p| p.begin_write(10, 20, 100, 5).unwrap()),
            [
                (DcLine::Command, vec![CASET]),
                (DcLine::Data, vec![0, 10, 0, 109]),
                (DcLine::Command, vec![RASET]),
                (DcLine::Data, vec![0, 20, 0, 239]),
                (DcLine::Command, vec![RAMWR]),
                (DcLine::Command, vec![RAMWRC]),
            ]
        );
    }

    #[test]
    fn test_unchanged_window_only_restarts_write() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let panel = Panel::new(
            BusScheduler::new(RecordingBus::new(), StdClock::new(), &pools, &lock),
            ScreenSize::PANEL,
        );

        sent(&panel, |p| p.begin_write(0, 0, 320, 240).unwrap());
        assert_eq!(
            sent(&panel, |p| p.begin_write(0, 0, 320, 240).unwrap()),
            [(DcLine::Command, vec![RAMWR]), (DcLine::Command, vec![RAMWRC])]
        );
    }

    #[test]
    fn test_moved_start_sends_short_range() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let panel = Panel::new(
            BusScheduler::new(RecordingBus::new(), StdClock::new(), &pools, &lock),
            ScreenSize::PANEL,
        );

        sent(&panel, |p| p.begin_write(0, 0, 320, 240).unwrap());
        assert_eq!(
            sent(&panel, |p| p.begin_write(0, 50, 320, 4).unwrap()),
            [
                (DcLine::Command, vec![RASET]),
                (DcLine::Data, vec![0, 50]),
                (DcLine::Command, vec![RAMWR]),
                (DcLine::Command, vec![RAMWRC]),
            ]
        );
    }

    #[test]
    fn test_single_row_keeps_wider_cached_right_edge() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let panel = Panel::new(
            BusScheduler::new(RecordingBus::new(), StdClock::new(), &pools, &lock),
            ScreenSize::PANEL,
        );

        sent(&panel, |p| p.begin_write(0, 0, 200, 10).unwrap());
        assert_eq!(
            sent(&panel, |p| p.begin_write(0, 30, 50, 1).unwrap()),
            [
                (DcLine::Command, vec![RASET]),
                (DcLine::Data, vec![0, 30]),
                (DcLine::Command, vec![RAMWR]),
            ]
        );
    }

    #[test]
    fn test_single_row_extends_to_screen_edge() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let panel = Panel::new(
            BusScheduler::new(RecordingBus::new(), StdClock::new(), &pools, &lock),
            ScreenSize::PANEL,
        );

        sent(&panel, |p| p.begin_write(40, 0, 20, 10).unwrap());
        assert_eq!(
            sent(&panel, |p| p.begin_write(40, 12, 100, 1).unwrap()),
            [
                (DcLine::Command, vec![CASET]),
                (DcLine::Data, vec![0, 40, 1, 63]),
                (DcLine::Command, vec![RASET]),
                (DcLine::Data, vec![0, 12]),
                (DcLine::Command, vec![RAMWR]),
            ]
        );
    }

    #[test]
    fn test_rows_reach_panel_model() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let panel = Panel::new(
            BusScheduler::new(RecordingBus::new(), StdClock::new(), &pools, &lock),
            ScreenSize::PANEL,
        );

        sent(&panel, |p| {
            p.begin_write(5, 7, 2, 2).unwrap();
            let mut buffer = p.acquire_buffer().unwrap();
            buffer.get_mut().0[..4].copy_from_slice(&[1u16.to_be(), 2u16.to_be(), 3u16.to_be(), 4u16.to_be()]);
            p.write_rows(buffer, 2, 2).unwrap();
        });

        panel.scheduler().bus().panel(|model| {
            assert_eq!(model.row(7)[5..7], [1, 2]);
            assert_eq!(model.row(8)[5..7], [3, 4]);
        });
    }
}
