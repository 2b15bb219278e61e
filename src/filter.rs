//! Linear blending across stretched rows and columns.
//!
//! When a logical column is stretched into two physical columns, the second
//! one is replaced by the midpoint of its neighbours; the same goes for the
//! duplicate rows of a stretched logical row. The result softens the
//! nearest-neighbour blockiness of non-integer scale factors.
//!
//! Pixels here are in wire (big-endian) order, straight out of a line buffer.

use embedded_graphics::pixelcolor::raw::RawU16;
use embedded_graphics::pixelcolor::{Rgb565, RgbColor};

use crate::colors;
use crate::geometry::Geometry;
use crate::settings::FilterMode;

/// Per-channel midpoint of two wire-order pixels.
///
/// Each channel computes `c0 + (c1 - c0) / 2` with an arithmetic shift.
pub fn blend(
    a: u16,
    b: u16,
) -> u16 {
    let a = Rgb565::from(RawU16::new(u16::from_be(a)));
    let b = Rgb565::from(RawU16::new(u16::from_be(b)));
    let mid = |c0: u8, c1: u8| (((i16::from(c1) - i16::from(c0)) >> 1) + i16::from(c0)) as u8;

    let out = Rgb565::new(mid(a.r(), b.r()), mid(a.g(), b.g()), mid(a.b(), b.b()));
    colors::wire(out)
}

/// Blend one filled burst in place.
///
/// `buffer` holds `rows` rows of `width` pixels whose top-left pixel sits
/// at screen (`left`, `top`). Duplicate columns are blended within each
/// row. The last duplicate row before each non-duplicate row is rebuilt
/// from the rows above and below it.
pub fn filter_burst(
    buffer: &mut [u16],
    geometry: &Geometry,
    left: u16,
    top: u16,
    width: u16,
    rows: u16,
    mode: FilterMode,
) {
    let width = usize::from(width);
    let left = usize::from(left);
    let mut fill_line: Option<usize> = None;

    for y in 0..usize::from(rows) {
        if mode.filters_y() && y > 0 && geometry.is_duplicate_row(usize::from(top) + y) {
            fill_line = Some(y);
            continue;
        }

        if mode.filters_x() {
            let row = &mut buffer[y * width..(y + 1) * width];
            // Edge columns have only one neighbour in the burst and stay as
            // resampled, even when a full redraw would blend them.
            for x in 1..width.saturating_sub(1) {
                if geometry.is_duplicate_column(left + x) {
                    row[x] = blend(row[x - 1], row[x + 1]);
                }
            }
        }

        if let Some(fill) = fill_line.take() {
            let (above, rest) = buffer[(fill - 1) * width..(fill + 2) * width].split_at_mut(width);
            let (line, below) = rest.split_at_mut(width);
            for ((out, &a), &c) in line.iter_mut().zip(above.iter()).zip(below.iter()) {
                *out = blend(a, c);
            }
        }
    }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ScreenSize;
    use crate::settings::{AspectRatio, ScalePolicy};

    fn wire(
        r: u8,
        g: u8,
        b: u8,
    ) -> u16 {
        colors::wire(Rgb565::new(r, g, b))
    }

    #[test]
    fn test_blend_midpoint_per_channel() {
        assert_eq!(blend(wire(0, 0, 0), wire(31, 63, 31)), wire(15, 31, 15));
        // The shift rounds toward negative infinity either way round.
        assert_eq!(blend(wire(31, 63, 31), wire(0, 0, 0)), wire(15, 31, 15));
        assert_eq!(blend(wire(4, 8, 4), wire(7, 9, 5)), wire(5, 8, 4));
        assert_eq!(blend(wire(10, 20, 30), wire(10, 20, 30)), wire(10, 20, 30));
    }

    #[test]
    fn test_blend_output_is_wire_order() {
        let white = colors::wire(colors::WHITE);
        let black = colors::wire(colors::BLACK);
        let mid = u16::from_be(blend(black, white));
        assert_eq!(mid, (15 << 11) | (31 << 5) | 15);
    }

    #[test]
    fn test_duplicate_columns_are_blended() {
        let mut geometry = Geometry::new(ScreenSize::PANEL);
        geometry.rebuild(160, 144, ScalePolicy::Aspect(AspectRatio::FOUR_THREE));

        // Columns 0,1 come from logical 0 and columns 2,3 from logical 1.
        let black = wire(0, 0, 0);
        let white = wire(31, 63, 31);
        let mut buffer = [black, black, white, white];
        filter_burst(&mut buffer, &geometry, 0, 0, 4, 1, FilterMode::LinearX);
        assert_eq!(buffer, [black, blend(black, white), white, white]);
    }

    #[test]
    fn test_duplicate_column_at_burst_edge_is_kept() {
        let mut geometry = Geometry::new(ScreenSize::PANEL);
        geometry.rebuild(160, 144, ScalePolicy::Aspect(AspectRatio::FOUR_THREE));
        assert!(geometry.is_duplicate_column(1));

        // The burst starts on duplicate column 1, which has no left neighbour here.
        let black = wire(0, 0, 0);
        let white = wire(31, 63, 31);
        let mut buffer = [black, white, white];
        filter_burst(&mut buffer, &geometry, 1, 0, 3, 1, FilterMode::LinearX);
        assert_eq!(buffer, [black, white, white]);
    }

    #[test]
    fn test_duplicate_row_is_rebuilt_from_neighbours() {
        let mut geometry = Geometry::new(ScreenSize::PANEL);
        geometry.rebuild(160, 144, ScalePolicy::Aspect(AspectRatio::FOUR_THREE));
        assert!(geometry.is_duplicate_row(1) && !geometry.is_duplicate_row(2));

        let top = wire(0, 0, 0);
        let bottom = wire(30, 60, 30);
        let mut buffer = [top, top, bottom];
        filter_burst(&mut buffer, &geometry, 0, 0, 1, 3, FilterMode::LinearY);
        assert_eq!(buffer, [top, wire(15, 30, 15), bottom]);
    }

    #[test]
    fn test_unscaled_burst_is_untouched() {
        let geometry = Geometry::new(ScreenSize::PANEL);
        let mut buffer = [1u16, 2, 3, 4, 5, 6];
        filter_burst(&mut buffer, &geometry, 0, 0, 3, 2, FilterMode::Bilinear);
        assert_eq!(buffer, [1, 2, 3, 4, 5, 6]);
    }
}
