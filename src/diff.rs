//! Diff Engine: changed-column spans between two logical frames.
//!
//! Runs on the producer, right before the frame goes into the mailbox. The
//! result lands in the current frame's [`DiffTable`](crate::frame::DiffTable).
//!
//! Rows are compared as raw 32-bit words when the palette did not change,
//! which is cheap but only resolves changes to whole words (four indexed
//! pixels, two RGB565 pixels). Trailing pixels that do not fill a word are
//! not compared on that path. With a changed palette every pixel is
//! resolved and compared exactly.

use crate::config::{FULL_UPDATE_THRESHOLD_PERCENT, MERGE_SLACK};
use crate::frame::{LineDiff, LogicalFrame, PixelFormat, palette_len};
use crate::geometry::LineCaps;

/// How rows of the two frames can be compared.
#[derive(Clone, Copy)]
enum Compare {
    /// Raw words under a mask.
    Words(u32),
    /// Resolved colors, pixel by pixel.
    Resolved,
}

/// Diff `current` against `previous` and fill `current`'s diff table.
///
/// Returns the number of logical rows that changed, or the frame height
/// when the change is large enough to make a full update cheaper. In that
/// case the table holds a single block spanning the frame.
///
/// With `caps`, dirty blocks are widened to rows a partial transfer may
/// start and stop on, so blended duplicate runs are always resent whole.
pub fn diff_frames(
    current: &mut LogicalFrame<'_>,
    previous: &LogicalFrame<'_>,
    caps: Option<&LineCaps>,
) -> u16 {
    let width = current.width();
    let height = current.height();
    let rows = usize::from(height);

    for line in &mut current.diff_mut().lines_mut()[..rows] {
        *line = LineDiff { left: 0, width: 0, repeat: 1 };
    }

    if previous.width() != width || previous.height() != height || previous.pixel_size() != current.pixel_size() {
        log_debug!("frame size changed, full update");
        current.mark_full();
        return height;
    }

    let compare = compare_mode(current.format(), previous.format());
    let mut budget = i64::from(width) * i64::from(height) * i64::from(FULL_UPDATE_THRESHOLD_PERCENT) / 100;
    let mut lines_changed = 0u16;

    for y in 0..rows {
        let span = match compare {
            Compare::Words(mask) => {
                word_span(current.row(y), previous.row(y), mask, current.pixel_size(), usize::from(width))
            }
            Compare::Resolved => resolved_span(current, previous, y),
        };
        let Some((left, right)) = span else { continue };

        let changed = (right - left) as u16;
        current.diff_mut().lines_mut()[y] = LineDiff { left: left as u16, width: changed, repeat: 1 };
        lines_changed += 1;

        budget -= i64::from(changed);
        if budget <= 0 {
            current.mark_full();
            return height;
        }
    }

    let lines = &mut current.diff_mut().lines_mut()[..rows];
    if let Some(caps) = caps {
        expand_to_caps(lines, width, caps);
    }
    merge_rows(lines);

    lines_changed
}

fn compare_mode(
    current: PixelFormat<'_>,
    previous: PixelFormat<'_>,
) -> Compare {
    match (current, previous) {
        (PixelFormat::Rgb565, PixelFormat::Rgb565) => Compare::Words(u32::MAX),
        (
            PixelFormat::Indexed { palette, mask, shift_mask },
            PixelFormat::Indexed { palette: old, mask: old_mask, shift_mask: old_shift },
        ) if mask == old_mask && shift_mask == old_shift => {
            let used = palette_len(mask, shift_mask);
            if core::ptr::eq(palette, old) || palette[..used] == old[..used] {
                Compare::Words(u32::from_ne_bytes([mask | shift_mask; 4]))
            } else {
                Compare::Resolved
            }
        }
        _ => Compare::Resolved,
    }
}

/// First and one-past-last changed pixel, compared one word at a time.
fn word_span(
    current: &[u8],
    previous: &[u8],
    mask: u32,
    pixel_size: usize,
    width: usize,
) -> Option<(usize, usize)> {
    let first = masked_words(current, mask).zip(masked_words(previous, mask)).position(|(a, b)| a != b)?;
    let last = masked_words(current, mask).zip(masked_words(previous, mask)).rposition(|(a, b)| a != b)?;

    let left = first * 4 / pixel_size;
    let right = ((last + 1) * 4 / pixel_size).min(width);
    Some((left, right))
}

fn masked_words(
    row: &[u8],
    mask: u32,
) -> impl ExactSizeIterator<Item = u32> + DoubleEndedIterator + '_ {
    row.chunks_exact(4).map(move |w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]) & mask)
}

/// First and one-past-last pixel whose resolved colors differ.
fn resolved_span(
    current: &LogicalFrame<'_>,
    previous: &LogicalFrame<'_>,
    y: usize,
) -> Option<(usize, usize)> {
    let width = usize::from(current.width());
    let (row, old_row) = (current.row(y), previous.row(y));
    let differs = |x: usize| current.resolve(row, x) != previous.resolve(old_row, x);

    let left = (0..width).position(differs)?;
    let right = left + (left..width).rposition(differs)? + 1;
    Some((left, right))
}

/// Grow every dirty run of rows out to the nearest clean start row above
/// and clean stop row below, and give the whole block one span, one pixel
/// wider on each side for the blend.
fn expand_to_caps(
    lines: &mut [LineDiff],
    width: u16,
    caps: &LineCaps,
) {
    let last = lines.len() - 1;
    let mut y = 0;
    while y < lines.len() {
        if lines[y].width == 0 {
            y += 1;
            continue;
        }

        let mut block_start = y;
        while block_start > 0 && (lines[block_start].width > 0 || !caps.can_start(block_start)) {
            block_start -= 1;
        }
        let mut block_end = y;
        while block_end < last && (lines[block_end].width > 0 || !caps.can_stop(block_end)) {
            block_end += 1;
        }

        let mut left = u16::MAX;
        let mut right = 0;
        for line in lines[block_start..=block_end].iter().filter(|l| l.width > 0) {
            left = left.min(line.left);
            right = right.max(line.left + line.width);
        }
        let left = left.saturating_sub(1);
        let right = (right + 1).min(width);

        for line in &mut lines[block_start..=block_end] {
            *line = LineDiff { left, width: right - left, repeat: 1 };
        }
        y = block_end + 1;
    }
}

/// Fold each row into the one above it when both edges are within
/// [`MERGE_SLACK`], walking bottom-up so repeat counts accumulate.
fn merge_rows(lines: &mut [LineDiff]) {
    for y in (1..lines.len()).rev() {
        let below = lines[y];
        let above = lines[y - 1];
        if (below.width == 0) != (above.width == 0) {
            continue;
        }

        let below_right = below.left + below.width;
        let above_right = above.left + above.width;
        if below.left.abs_diff(above.left) > MERGE_SLACK || below_right.abs_diff(above_right) > MERGE_SLACK {
            continue;
        }

        let left = below.left.min(above.left);
        lines[y - 1] = LineDiff {
            left,
            width: below_right.max(above_right) - left,
            repeat: below.repeat + 1,
        };
    }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================
