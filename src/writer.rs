//! Rect Writer: resamples dirty logical rectangles onto the panel.
//!
//! Each rectangle is mapped through the [`Geometry`], opened as one panel
//! window, and streamed in bursts of whole physical rows. A burst fills one
//! line buffer: duplicate rows of a stretched logical row are copied from
//! the row above, everything else is resampled with the same accumulator
//! walk the geometry tables were built from.

use embedded_graphics::pixelcolor::Rgb565;

use crate::clock::Clock;
use crate::colors;
use crate::config::BUFFER_PIXELS;
use crate::error::PipelineError;
use crate::filter;
use crate::frame::LogicalFrame;
use crate::geometry::{Geometry, ScreenSize};
use crate::panel::Panel;
use crate::scheduler::Bus;
use crate::settings::{FilterMode, ScalePolicy};

/// Owns the active geometry and writes frames through it.
pub struct RectWriter {
    geometry: Geometry,
    filter: FilterMode,
    scaling: bool,
    buffer_waits: u32,
}

impl RectWriter {
    pub fn new(screen: ScreenSize) -> Self {
        Self {
            geometry: Geometry::new(screen),
            filter: FilterMode::None,
            scaling: false,
            buffer_waits: 0,
        }
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry { &self.geometry }

    /// Rebuild the geometry for a logical frame size and policy.
    pub fn configure(
        &mut self,
        frame_width: u16,
        frame_height: u16,
        policy: ScalePolicy,
        filter: FilterMode,
    ) {
        self.geometry.rebuild(frame_width, frame_height, policy);
        self.scaling = matches!(policy, ScalePolicy::Aspect(_));
        self.filter = filter;
    }

    /// Blending is applied to the bursts being written.
    #[inline]
    pub fn filtering(&self) -> bool { self.scaling && self.filter.is_active() }

    /// Buffer acquisitions that found the pool empty since the last call.
    pub fn take_buffer_waits(&mut self) -> u32 { core::mem::take(&mut self.buffer_waits) }

    /// Write every dirty block of `frame`'s diff table.
    pub fn write_frame<'a, B, C>(
        &mut self,
        panel: &Panel<'a, B, C>,
        frame: &LogicalFrame<'_>,
    ) -> Result<(), PipelineError>
    where
        B: Bus<'a>,
        C: Clock,
    {
        for (y, diff) in frame.diff().blocks(frame.height()) {
            if diff.width > 0 {
                self.write_rect(panel, frame, diff.left, y, diff.width, diff.repeat)?;
            }
        }
        Ok(())
    }

    /// Write the whole of `frame`, ignoring its diff table.
    pub fn write_full<'a, B, C>(
        &mut self,
        panel: &Panel<'a, B, C>,
        frame: &LogicalFrame<'_>,
    ) -> Result<(), PipelineError>
    where
        B: Bus<'a>,
        C: Clock,
    {
        self.write_rect(panel, frame, 0, 0, frame.width(), frame.height())
    }

    /// Resample the logical rectangle (`left`, `top`, `width`, `height`)
    /// of `frame` onto the panel. Rectangles that map to nothing are skipped.
    pub fn write_rect<'a, B, C>(
        &mut self,
        panel: &Panel<'a, B, C>,
        frame: &LogicalFrame<'_>,
        left: u16,
        top: u16,
        width: u16,
        height: u16,
    ) -> Result<(), PipelineError>
    where
        B: Bus<'a>,
        C: Clock,
    {
        let geometry = &self.geometry;
        let Some(rect) = geometry.map_rect(left, top, width, height) else {
            return Ok(());
        };

        let screen = geometry.screen();
        let (sw, sh) = (u32::from(screen.width), u32::from(screen.height));
        let (x_inc, y_inc) = geometry.increments();
        let (x_origin, y_origin) = geometry.origin();
        let last_column = usize::from(frame.width()) - 1;
        let last_row = usize::from(frame.height()) - 1;

        let physical_width = usize::from(rect.width);
        let first_column = (x_inc * u32::from(rect.left - x_origin) / sw) as usize;
        let logical_row = |screen_y: u16| ((y_inc * u32::from(screen_y - y_origin) / sh) as usize).min(last_row);

        let lines_per_buffer = (BUFFER_PIXELS / physical_width).max(1) as u16;
        let filter_y = self.filtering() && self.filter.filters_y();
        let screen_bottom = rect.top + rect.height;

        panel.begin_write(rect.left, rect.top, rect.width, rect.height)?;

        let mut screen_y = rect.top;
        while screen_y < screen_bottom {
            let mut lines = lines_per_buffer.min(screen_bottom - screen_y);
            // A vertical blend needs the burst to end on a row whose
            // neighbour below is not a duplicate.
            if filter_y {
                while lines > 1
                    && (geometry.is_duplicate_row(usize::from(screen_y + lines - 1))
                        || geometry.is_duplicate_row(usize::from(screen_y + lines)))
                {
                    lines -= 1;
                }
            }

            if panel.scheduler().buffers_available() == 0 {
                self.buffer_waits += 1;
            }
            let mut buffer = panel.acquire_buffer()?;
            let pixels = &mut buffer.get_mut().0;

            for i in 0..usize::from(lines) {
                let row_y = screen_y + i as u16;
                let out = i * physical_width..(i + 1) * physical_width;
                let y = logical_row(row_y);

                if i > 0 && geometry.is_duplicate_row(usize::from(row_y)) {
                    pixels.copy_within(out.start - physical_width..out.start, out.start);
                } else {
                    let row = frame.row(y);
                    let mut x = first_column;
                    let mut acc = rect.x_acc;
                    for pixel in &mut pixels[out] {
                        *pixel = frame.resolve(row, x.min(last_column)).to_be();
                        acc += x_inc;
                        while acc >= sw {
                            acc -= sw;
                            x += 1;
                        }
                    }
                }

                if !geometry.is_duplicate_row(usize::from(row_y) + 1) {
                    // SAFETY: the Update Task is the only reader of handed-over
                    // frames and the row slice above is no longer alive.
                    unsafe { frame.clear_row(y) };
                }
            }

            if self.filtering() {
                let len = usize::from(lines) * physical_width;
                filter::filter_burst(&mut pixels[..len], geometry, rect.left, screen_y, rect.width, lines, self.filter);
            }

            panel.write_rows(buffer, rect.width, lines)?;
            screen_y += lines;
        }
        Ok(())
    }
}

/// Fill the whole screen with `color`.
pub fn fill_screen<'a, B, C>(
    panel: &Panel<'a, B, C>,
    color: Rgb565,
) -> Result<(), PipelineError>
where
    B: Bus<'a>,
    C: Clock,
{
    let screen = panel.screen();
    let width = usize::from(screen.width);
    let lines_per_buffer = (BUFFER_PIXELS / width) as u16;
    let wire = colors::wire(color);

    panel.begin_write(0, 0, screen.width, screen.height)?;
    let mut y = 0;
    while y < screen.height {
        let lines = lines_per_buffer.min(screen.height - y);
        let mut buffer = panel.acquire_buffer()?;
        buffer.get_mut().0[..usize::from(lines) * width].fill(wire);
        panel.write_rows(buffer, screen.width, lines)?;
        y += lines;
    }
    Ok(())
}

/// Copy a block of native-order RGB565 pixels to the screen, 1:1.
///
/// `pixels` is row-major with `width` pixels per row. The block is clipped
/// to the screen and to the rows `pixels` actually holds.
pub fn write_pixels<'a, B, C>(
    panel: &Panel<'a, B, C>,
    left: u16,
    top: u16,
    width: u16,
    height: u16,
    pixels: &[u16],
) -> Result<(), PipelineError>
where
    B: Bus<'a>,
    C: Clock,
{
    let screen = panel.screen();
    if width == 0 || left >= screen.width || top >= screen.height {
        return Ok(());
    }
    let stride = usize::from(width);
    let visible = width.min(screen.width - left);
    let rows = height.min(screen.height - top).min((pixels.len() / stride) as u16);
    if rows == 0 {
        return Ok(());
    }

    let columns = usize::from(visible);
    let lines_per_buffer = (BUFFER_PIXELS / columns) as u16;
    panel.begin_write(left, top, visible, rows)?;

    let mut y = 0;
    while y < rows {
        let lines = lines_per_buffer.min(rows - y);
        let mut buffer = panel.acquire_buffer()?;
        let out = &mut buffer.get_mut().0;
        for i in 0..usize::from(lines) {
            let src = (usize::from(y) + i) * stride;
            for (dst, &px) in out[i * columns..(i + 1) * columns].iter_mut().zip(&pixels[src..src + columns]) {
                *dst = px.to_be();
            }
        }
        panel.write_rows(buffer, visible, lines)?;
        y += lines;
    }
    Ok(())
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================
