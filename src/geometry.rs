//! Geometry Engine: fixed-point mapping from logical frame to physical screen.
//!
//! Scaling is a Bresenham-style rational stepper. Walking the physical axis,
//! an accumulator grows by `inc` per physical pixel; every time it reaches
//! the physical screen dimension, the logical index advances by one and the
//! dimension is subtracted. `inc == dimension` is 1:1, `inc < dimension`
//! stretches.
//!
//! From that walk the engine records, per physical row and column, where
//! stretched duplicate runs begin and end. The Rect Writer uses the tables
//! to copy instead of resample and to place blends; the Diff Engine uses
//! the derived per-logical-row caps to keep partial updates off the middle
//! of a run.
//!
//! All arithmetic is integer so the writer's own accumulator walk lands on
//! exactly the same duplicates as the tables.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::config::{MAX_FRAME_HEIGHT, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::settings::ScalePolicy;

/// Physical screen dimensions (at most the compiled panel size).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct ScreenSize {
    pub width: u16,
    pub height: u16,
}

impl ScreenSize {
    pub const PANEL: Self = Self::new(SCREEN_WIDTH as u16, SCREEN_HEIGHT as u16);

    pub const fn new(
        width: u16,
        height: u16,
    ) -> Self {
        assert!(width as usize <= SCREEN_WIDTH && height as usize <= SCREEN_HEIGHT);
        Self { width, height }
    }
}

/// Filter capability of one physical row or column.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct AxisCap {
    /// First line of its duplicate run: a partial transfer may begin here.
    pub start: bool,
    /// Last line of its duplicate run: a partial transfer may end here.
    pub stop: bool,
    /// Repeats the previous physical line's logical source.
    pub duplicate: bool,
    /// Physical lines produced by this line's logical source (0 outside the image).
    pub repeat: u8,
}

/// Physical rectangle for a logical rectangle, plus the writer's entry state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PhysicalRect {
    /// Screen coordinates (origin already applied).
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
    /// Horizontal accumulator at `left`.
    pub x_acc: u32,
}

/// Scale factors, centering offsets and the per-line capability tables.
pub struct Geometry {
    screen: ScreenSize,
    frame_width: u16,
    frame_height: u16,
    x_inc: u32,
    y_inc: u32,
    x_origin: u16,
    y_origin: u16,
    rows: [AxisCap; SCREEN_HEIGHT],
    columns: [AxisCap; SCREEN_WIDTH],
    /// Physical run length per logical row.
    line_runs: [u8; MAX_FRAME_HEIGHT],
}

impl Geometry {
    /// 1:1 geometry for a frame that exactly fills `screen`.
    pub fn new(screen: ScreenSize) -> Self {
        let mut geometry = Self {
            screen,
            frame_width: 0,
            frame_height: 0,
            x_inc: u32::from(screen.width),
            y_inc: u32::from(screen.height),
            x_origin: 0,
            y_origin: 0,
            rows: [AxisCap::default(); SCREEN_HEIGHT],
            columns: [AxisCap::default(); SCREEN_WIDTH],
            line_runs: [0; MAX_FRAME_HEIGHT],
        };
        geometry.rebuild(screen.width, screen.height.min(MAX_FRAME_HEIGHT as u16), ScalePolicy::Native);
        geometry
    }

    /// Recompute the mapping and tables for a logical frame size and policy.
    pub fn rebuild(
        &mut self,
        frame_width: u16,
        frame_height: u16,
        policy: ScalePolicy,
    ) {
        let sw = self.screen.width;
        let sh = self.screen.height;
        let frame_height = frame_height.min(MAX_FRAME_HEIGHT as u16);
        self.frame_width = frame_width;
        self.frame_height = frame_height;

        match policy {
            ScalePolicy::Native => {
                self.x_inc = u32::from(sw);
                self.y_inc = u32::from(sh);
                self.x_origin = sw.saturating_sub(frame_width) / 2;
                self.y_origin = sh.saturating_sub(frame_height) / 2;
            }
            ScalePolicy::Aspect(ratio) => {
                let ratio_num = u32::from(ratio.num.max(1));
                let ratio_den = u32::from(ratio.den.max(1));
                let new_height = u32::from(sh);
                let new_width = (new_height * ratio_num / ratio_den).clamp(1, u32::from(sw));
                self.x_inc = (u32::from(sw) * u32::from(frame_width) / new_width).max(1);
                self.y_inc = (u32::from(sh) * u32::from(frame_height) / new_height).max(1);
                self.x_origin = ((u32::from(sw) - new_width) / 2) as u16;
                self.y_origin = 0;
            }
        }

        let line_runs = &mut self.line_runs;
        line_runs.fill(0);
        walk_axis(
            &mut self.rows[..usize::from(sh)],
            usize::from(self.y_origin),
            self.y_inc,
            u32::from(sh),
            usize::from(frame_height),
            |line, run| line_runs[line] = run,
        );
        walk_axis(
            &mut self.columns[..usize::from(sw)],
            usize::from(self.x_origin),
            self.x_inc,
            u32::from(sw),
            usize::from(frame_width),
            |_, _| {},
        );

        log_info!(
            "geometry {}x{} inc {}/{} origin {},{}",
            frame_width,
            frame_height,
            self.x_inc,
            self.y_inc,
            self.x_origin,
            self.y_origin
        );
    }

    #[inline]
    pub fn screen(&self) -> ScreenSize { self.screen }

    #[inline]
    pub fn frame_size(&self) -> (u16, u16) { (self.frame_width, self.frame_height) }

    #[inline]
    pub fn increments(&self) -> (u32, u32) { (self.x_inc, self.y_inc) }

    #[inline]
    pub fn origin(&self) -> (u16, u16) { (self.x_origin, self.y_origin) }

    /// Whether the mapping stretches or shrinks either axis.
    pub fn is_scaled(&self) -> bool {
        self.x_inc != u32::from(self.screen.width) || self.y_inc != u32::from(self.screen.height)
    }

    #[inline]
    pub fn row_cap(
        &self,
        y: usize,
    ) -> AxisCap {
        self.rows.get(y).copied().unwrap_or_default()
    }

    #[inline]
    pub fn column_cap(
        &self,
        x: usize,
    ) -> AxisCap {
        self.columns.get(x).copied().unwrap_or_default()
    }

    /// Physical row `y` repeats the previous row's logical source.
    #[inline]
    pub fn is_duplicate_row(
        &self,
        y: usize,
    ) -> bool {
        y < usize::from(self.screen.height) && self.rows[y].duplicate
    }

    /// Physical column `x` repeats the previous column's logical source.
    #[inline]
    pub fn is_duplicate_column(
        &self,
        x: usize,
    ) -> bool {
        x < usize::from(self.screen.width) && self.columns[x].duplicate
    }

    /// Number of physical rows logical row `line` is stretched into.
    #[inline]
    pub fn line_run(
        &self,
        line: usize,
    ) -> u8 {
        self.line_runs.get(line).copied().unwrap_or(0)
    }

    /// Map a logical rectangle to the physical pixels that sample it.
    ///
    /// Each edge maps to the first physical coordinate whose accumulator
    /// position is at or past it. Returns `None` when nothing is left
    /// after mapping and clipping.
    pub fn map_rect(
        &self,
        left: u16,
        top: u16,
        width: u16,
        height: u16,
    ) -> Option<PhysicalRect> {
        let sw = u32::from(self.screen.width);
        let sh = u32::from(self.screen.height);
        let to_physical = |logical: u32, dim: u32, inc: u32| (dim * logical).div_ceil(inc);

        let actual_left = to_physical(u32::from(left), sw, self.x_inc);
        let actual_right = to_physical(u32::from(left) + u32::from(width), sw, self.x_inc);
        let actual_top = to_physical(u32::from(top), sh, self.y_inc);
        let actual_bottom = to_physical(u32::from(top) + u32::from(height), sh, self.y_inc);

        let screen_left = u32::from(self.x_origin) + actual_left;
        let screen_top = u32::from(self.y_origin) + actual_top;
        let screen_right = (u32::from(self.x_origin) + actual_right).min(sw);
        let screen_bottom = (u32::from(self.y_origin) + actual_bottom).min(sh);

        if screen_right <= screen_left || screen_bottom <= screen_top {
            return None;
        }
        Some(PhysicalRect {
            left: screen_left as u16,
            top: screen_top as u16,
            width: (screen_right - screen_left) as u16,
            height: (screen_bottom - screen_top) as u16,
            x_acc: (self.x_inc * actual_left) % sw,
        })
    }
}

/// Walk one axis and fill its capability table.
///
/// `on_line(logical, run)` reports each logical line's physical run length,
/// including 0 for lines a downscale skips.
fn walk_axis(
    caps: &mut [AxisCap],
    origin: usize,
    inc: u32,
    dim: u32,
    logical_len: usize,
    mut on_line: impl FnMut(usize, u8),
) {
    caps.fill(AxisCap::default());
    if logical_len == 0 || origin >= caps.len() {
        return;
    }

    let mut acc = 0u32;
    let mut logical = 0usize;
    let mut run = 0u8;
    let mut run_start = origin;
    let mut p = origin;

    while logical < logical_len && p < caps.len() {
        run = run.saturating_add(1);
        caps[p].duplicate = run > 1;
        p += 1;

        acc += inc;
        let mut advanced = 0;
        while acc >= dim {
            acc -= dim;
            advanced += 1;
        }
        if advanced > 0 {
            close_run(&mut caps[run_start..p], run);
            on_line(logical, run);
            for skipped in (logical + 1)..(logical + advanced).min(logical_len) {
                on_line(skipped, 0);
            }
            logical += advanced;
            run = 0;
            run_start = p;
        }
    }
    // Clipped by the screen edge in the middle of a run.
    if run > 0 {
        close_run(&mut caps[run_start..p], run);
        on_line(logical, run);
    }

    // Edge lines are always transferable.
    caps[origin].start = true;
    caps[p - 1].stop = true;
}

fn close_run(
    run_caps: &mut [AxisCap],
    run: u8,
) {
    for cap in run_caps.iter_mut() {
        cap.repeat = run;
    }
    if let Some(first) = run_caps.first_mut() {
        first.start = true;
    }
    if let Some(last) = run_caps.last_mut() {
        last.stop = true;
    }
}

// =============================================================================
// Published line caps
// =============================================================================

const CAP_START: u8 = 1 << 0;
const CAP_STOP: u8 = 1 << 1;

/// Per-logical-row filter caps, published by the Update Task for the
/// producer's Diff Engine.
///
/// A logical row may start a partial block when it is stretched into one
/// or two physical rows, and may end one only when it maps to exactly one.
/// The first row can always start and the last row can always stop.
pub struct LineCaps {
    lines: [AtomicU8; MAX_FRAME_HEIGHT],
}

impl LineCaps {
    pub const fn new() -> Self {
        Self {
            lines: [const { AtomicU8::new(CAP_START | CAP_STOP) }; MAX_FRAME_HEIGHT],
        }
    }

    /// Copy the caps implied by `geometry`'s current row table.
    pub fn publish(
        &self,
        geometry: &Geometry,
    ) {
        let height = usize::from(geometry.frame_height);
        for (line, slot) in self.lines.iter().enumerate() {
            let run = geometry.line_run(line);
            let mut caps = 0;
            if run == 1 || run == 2 || line == 0 {
                caps |= CAP_START;
            }
            if run == 1 || line + 1 == height {
                caps |= CAP_STOP;
            }
            slot.store(caps, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn can_start(
        &self,
        line: usize,
    ) -> bool {
        self.lines.get(line).is_some_and(|c| c.load(Ordering::Relaxed) & CAP_START != 0)
    }

    #[inline]
    pub fn can_stop(
        &self,
        line: usize,
    ) -> bool {
        self.lines.get(line).is_some_and(|c| c.load(Ordering::Relaxed) & CAP_STOP != 0)
    }
}

impl Default for LineCaps {
    fn default() -> Self { Self::new() }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AspectRatio;

    #[test]
    fn test_identity_mapping() {
        let screen = ScreenSize::new(160, 144);
        let mut geometry = Geometry::new(screen);
        geometry.rebuild(160, 144, ScalePolicy::Native);

        assert!(!geometry.is_scaled());
        assert_eq!(geometry.origin(), (0, 0));
        for y in 0..144 {
            let cap = geometry.row_cap(y);
            assert_eq!((cap.start, cap.stop, cap.duplicate, cap.repeat), (true, true, false, 1));
            assert_eq!(geometry.line_run(y), 1);
        }
        for x in 0..160 {
            assert_eq!(geometry.column_cap(x).repeat, 1);
            assert!(!geometry.is_duplicate_column(x));
        }
        assert_eq!(
            geometry.map_rect(10, 20, 8, 1),
            Some(PhysicalRect { left: 10, top: 20, width: 8, height: 1, x_acc: 0 })
        );
    }

    #[test]
    fn test_native_mode_centers_small_frame() {
        let mut geometry = Geometry::new(ScreenSize::PANEL);
        geometry.rebuild(160, 144, ScalePolicy::Native);

        assert_eq!(geometry.origin(), (80, 48));
        assert_eq!(geometry.row_cap(47).repeat, 0);
        assert_eq!(geometry.row_cap(48).repeat, 1);
        assert_eq!(geometry.row_cap(191).repeat, 1);
        assert_eq!(geometry.row_cap(192).repeat, 0);
        assert_eq!(geometry.map_rect(0, 0, 160, 144).map(|r| (r.left, r.top, r.width, r.height)), Some((80, 48, 160, 144)));
    }

    #[test]
    fn test_fill_partitions_rows_into_runs() {
        let mut geometry = Geometry::new(ScreenSize::PANEL);
        geometry.rebuild(160, 144, ScalePolicy::Aspect(AspectRatio::FOUR_THREE));

        assert_eq!(geometry.increments(), (160, 144));
        assert_eq!(geometry.origin(), (0, 0));

        // Every physical row belongs to exactly one run: start opens it,
        // stop closes it, nothing overlaps and the runs cover the height.
        let mut open = false;
        let mut runs = 0;
        let mut covered = 0;
        for y in 0..SCREEN_HEIGHT {
            let cap = geometry.row_cap(y);
            assert!(cap.repeat >= 1);
            if cap.start {
                assert!(!open, "run opened twice at row {y}");
                assert!(!cap.duplicate);
                open = true;
            } else {
                assert!(cap.duplicate);
            }
            covered += 1;
            if cap.stop {
                assert!(open);
                open = false;
                runs += 1;
            }
        }
        assert!(!open);
        assert_eq!(covered, SCREEN_HEIGHT);
        assert_eq!(runs, 144);

        // 144 -> 240 is 5:3, so runs alternate between one and two rows.
        let total: u32 = (0..144).map(|y| u32::from(geometry.line_run(y))).sum();
        assert_eq!(total, SCREEN_HEIGHT as u32);
        assert!((0..144).all(|y| matches!(geometry.line_run(y), 1 | 2)));
        // 160 -> 320 doubles every column.
        assert!((0..SCREEN_WIDTH).all(|x| geometry.column_cap(x).repeat == 2));
        assert!(geometry.is_duplicate_column(1) && !geometry.is_duplicate_column(2));
    }

    #[test]
    fn test_fit_centers_horizontally() {
        let mut geometry = Geometry::new(ScreenSize::PANEL);
        geometry.rebuild(160, 144, ScalePolicy::Aspect(AspectRatio::new(160, 144)));

        // 240 * 160 / 144 = 266 pixels wide.
        assert_eq!(geometry.origin(), (27, 0));
        assert_eq!(geometry.row_cap(0).start, true);
        assert_eq!(geometry.column_cap(26).repeat, 0);
        assert_eq!(geometry.column_cap(27).start, true);
    }

    #[test]
    fn test_wide_ratio_is_clamped_to_screen() {
        let mut geometry = Geometry::new(ScreenSize::PANEL);
        geometry.rebuild(256, 224, ScalePolicy::Aspect(AspectRatio::new(16, 9)));
        assert_eq!(geometry.origin().0, 0);
        assert_eq!(geometry.increments().0, 256);
    }

    #[test]
    fn test_map_rect_scaled_covers_duplicates() {
        let mut geometry = Geometry::new(ScreenSize::PANEL);
        geometry.rebuild(160, 144, ScalePolicy::Aspect(AspectRatio::FOUR_THREE));

        let rect = geometry.map_rect(10, 10, 8, 1).unwrap();
        assert_eq!((rect.left, rect.width), (20, 16));
        // Logical row 10 starts at ceil(2400 / 144) = 17 and row 11 at 19.
        assert_eq!((rect.top, rect.height), (17, 2));
        assert_eq!(rect.x_acc, 0);
    }

    #[test]
    fn test_map_rect_degenerate_is_none() {
        let geometry = Geometry::new(ScreenSize::PANEL);
        assert_eq!(geometry.map_rect(5, 5, 0, 3), None);
        assert_eq!(geometry.map_rect(5, 5, 3, 0), None);
    }

    #[test]
    fn test_line_caps_follow_run_lengths() {
        let mut geometry = Geometry::new(ScreenSize::PANEL);
        geometry.rebuild(160, 144, ScalePolicy::Aspect(AspectRatio::FOUR_THREE));
        let caps = LineCaps::new();
        caps.publish(&geometry);

        for y in 0..144 {
            let run = geometry.line_run(y);
            assert_eq!(caps.can_start(y), run <= 2 || y == 0);
            assert_eq!(caps.can_stop(y), run == 1 || y == 143);
        }
        assert!(caps.can_start(0));
        assert!(caps.can_stop(143));
    }
}
