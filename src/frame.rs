//! Logical frames as handed over by the emulated machine.
//!
//! A [`LogicalFrame`] describes a pixel buffer the producer owns: its size,
//! row stride, pixel format and palette, an optional clear byte, and the
//! [`DiffTable`] the Diff Engine fills in for it.
//!
//! The frame does not own its pixels. It keeps a raw pointer so that the
//! Update Task can read (and, with a clear byte, wipe) rows of a frame the
//! producer has already handed over, while the producer still holds the
//! frame for the next diff. The borrow that created the frame bounds its
//! lifetime.

use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::config::MAX_FRAME_HEIGHT;
use crate::error::FrameError;

/// Pixel layout of a logical frame.
#[derive(Clone, Copy, Debug)]
pub enum PixelFormat<'p> {
    /// Two bytes per pixel, native-order RGB565.
    Rgb565,
    /// One byte per pixel, resolved through a native-order RGB565 palette.
    ///
    /// `mask` selects the valid index bits. A set `shift_mask` bit selects
    /// the second half of a dual palette (offset `mask + 1`).
    Indexed {
        palette: &'p [u16],
        mask: u8,
        shift_mask: u8,
    },
}

impl PixelFormat<'_> {
    #[inline]
    pub const fn pixel_size(&self) -> usize {
        match self {
            Self::Rgb565 => 2,
            Self::Indexed { .. } => 1,
        }
    }

    /// Palette index for a raw indexed pixel.
    #[inline]
    pub const fn index(
        mask: u8,
        shift_mask: u8,
        raw: u8,
    ) -> usize {
        let base = (raw & mask) as usize;
        if raw & shift_mask != 0 { base + mask as usize + 1 } else { base }
    }
}

/// Entries a palette needs to cover every index the masks can produce.
pub(crate) fn palette_len(
    mask: u8,
    shift_mask: u8,
) -> usize {
    PixelFormat::index(mask, shift_mask, 0xFF).max(usize::from(mask)) + 1
}

/// Changed-column span of one logical row.
///
/// `repeat` rows starting here share the span; rows covered by a repeat
/// block are not described separately. `width == 0` means unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct LineDiff {
    pub left: u16,
    pub width: u16,
    pub repeat: u16,
}

/// One [`LineDiff`] per logical row.
#[derive(Clone, Debug)]
pub struct DiffTable {
    lines: [LineDiff; MAX_FRAME_HEIGHT],
}

impl DiffTable {
    pub const fn new() -> Self {
        Self {
            lines: [LineDiff { left: 0, width: 0, repeat: 1 }; MAX_FRAME_HEIGHT],
        }
    }

    #[inline]
    pub fn lines(&self) -> &[LineDiff] { &self.lines }

    #[inline]
    pub fn lines_mut(&mut self) -> &mut [LineDiff] { &mut self.lines }

    /// Iterate the described blocks of a `height`-row frame as
    /// `(first_row, diff)`, skipping rows covered by a repeat.
    pub fn blocks(
        &self,
        height: u16,
    ) -> impl Iterator<Item = (u16, LineDiff)> + '_ {
        let mut y = 0u16;
        core::iter::from_fn(move || {
            if y >= height {
                return None;
            }
            let diff = self.lines[usize::from(y)];
            let first = y;
            y = y.saturating_add(diff.repeat.max(1));
            Some((first, diff))
        })
    }
}

impl Default for DiffTable {
    fn default() -> Self { Self::new() }
}

/// A finished frame from the emulated machine.
pub struct LogicalFrame<'a> {
    width: u16,
    height: u16,
    stride: usize,
    format: PixelFormat<'a>,
    clear: Option<u8>,
    pixels: NonNull<u8>,
    len: usize,
    diff: DiffTable,
    _pixels: PhantomData<&'a mut [u8]>,
}

impl<'a> LogicalFrame<'a> {
    /// Describe `pixels` as a `width` x `height` frame with `stride` bytes per row.
    pub fn new(
        width: u16,
        height: u16,
        stride: usize,
        format: PixelFormat<'a>,
        pixels: &'a mut [u8],
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty);
        }
        if usize::from(height) > MAX_FRAME_HEIGHT {
            return Err(FrameError::TooTall { height });
        }
        let row_bytes = usize::from(width) * format.pixel_size();
        if stride < row_bytes {
            return Err(FrameError::StrideTooSmall { stride });
        }
        let needed = stride * (usize::from(height) - 1) + row_bytes;
        if pixels.len() < needed {
            return Err(FrameError::BufferTooSmall { needed, len: pixels.len() });
        }
        if let PixelFormat::Indexed { palette, mask, shift_mask } = format {
            let needed = palette_len(mask, shift_mask);
            if palette.len() < needed {
                return Err(FrameError::PaletteTooSmall { needed, len: palette.len() });
            }
        }

        Ok(Self {
            width,
            height,
            stride,
            format,
            clear: None,
            len: pixels.len(),
            pixels: NonNull::from(pixels).cast(),
            diff: DiffTable::new(),
            _pixels: PhantomData,
        })
    }

    /// Fill transmitted rows with `byte` once the Update Task is done with them.
    pub fn with_clear(
        mut self,
        byte: u8,
    ) -> Self {
        self.clear = Some(byte);
        self
    }

    #[inline]
    pub fn width(&self) -> u16 { self.width }

    #[inline]
    pub fn height(&self) -> u16 { self.height }

    #[inline]
    pub fn stride(&self) -> usize { self.stride }

    #[inline]
    pub fn format(&self) -> PixelFormat<'a> { self.format }

    #[inline]
    pub fn clear_byte(&self) -> Option<u8> { self.clear }

    #[inline]
    pub fn pixel_size(&self) -> usize { self.format.pixel_size() }

    /// Swap in another palette with the same masks.
    pub fn set_palette(
        &mut self,
        palette: &'a [u16],
    ) -> Result<(), FrameError> {
        if let PixelFormat::Indexed { palette: current, mask, shift_mask } = &mut self.format {
            let needed = palette_len(*mask, *shift_mask);
            if palette.len() < needed {
                return Err(FrameError::PaletteTooSmall { needed, len: palette.len() });
            }
            *current = palette;
        }
        Ok(())
    }

    #[inline]
    pub fn diff(&self) -> &DiffTable { &self.diff }

    #[inline]
    pub fn diff_mut(&mut self) -> &mut DiffTable { &mut self.diff }

    /// Whole pixel buffer, for the producer to draw into.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        // SAFETY: `pixels`/`len` come from a `&'a mut [u8]` and `&mut self`
        // excludes every other view created through this frame.
        unsafe { core::slice::from_raw_parts_mut(self.pixels.as_ptr(), self.len) }
    }

    /// Bytes of logical row `y` (exactly `width * pixel_size` long).
    #[inline]
    pub fn row(
        &self,
        y: usize,
    ) -> &[u8] {
        assert!(y < usize::from(self.height));
        let start = y * self.stride;
        let len = usize::from(self.width) * self.pixel_size();
        // SAFETY: `new` checked that every row lies inside the buffer.
        unsafe { core::slice::from_raw_parts(self.pixels.as_ptr().add(start), len) }
    }

    /// Native RGB565 value of pixel `x` in a row returned by [`row`](Self::row).
    #[inline]
    pub fn resolve(
        &self,
        row: &[u8],
        x: usize,
    ) -> u16 {
        match self.format {
            PixelFormat::Rgb565 => u16::from_ne_bytes([row[2 * x], row[2 * x + 1]]),
            PixelFormat::Indexed { palette, mask, shift_mask } => {
                palette[PixelFormat::index(mask, shift_mask, row[x])]
            }
        }
    }

    /// Fill logical row `y` with the clear byte, if one is set.
    ///
    /// # Safety
    ///
    /// No slice of row `y` obtained through [`row`](Self::row) may be alive,
    /// and the producer must not be reading the row concurrently.
    pub(crate) unsafe fn clear_row(
        &self,
        y: usize,
    ) {
        if let Some(byte) = self.clear {
            if y < usize::from(self.height) {
                let len = usize::from(self.width) * self.pixel_size();
                // SAFETY: in bounds per `new`; exclusivity upheld by the caller.
                unsafe { core::ptr::write_bytes(self.pixels.as_ptr().add(y * self.stride), byte, len) };
            }
        }
    }

    /// Mark the whole frame dirty: one block spanning every row and column.
    pub fn mark_full(&mut self) {
        self.diff.lines[0] = LineDiff {
            left: 0,
            width: self.width,
            repeat: self.height,
        };
    }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_buffer() {
        let mut pixels = [0u8; 10];
        let err = LogicalFrame::new(4, 3, 4, PixelFormat::Rgb565, &mut pixels).err();
        assert_eq!(err, Some(FrameError::StrideTooSmall { stride: 4 }));

        let err = LogicalFrame::new(2, 3, 4, PixelFormat::Rgb565, &mut pixels).err();
        assert_eq!(err, Some(FrameError::BufferTooSmall { needed: 12, len: 10 }));
    }

    #[test]
    fn test_rejects_small_palette() {
        let mut pixels = [0u8; 16];
        let palette = [0u16; 4];
        let format = PixelFormat::Indexed { palette: &palette, mask: 0x03, shift_mask: 0x04 };
        let err = LogicalFrame::new(4, 4, 4, format, &mut pixels).err();
        assert_eq!(err, Some(FrameError::PaletteTooSmall { needed: 8, len: 4 }));
    }

    #[test]
    fn test_rows_respect_stride() {
        let mut pixels = [0u8; 12];
        pixels[6] = 7;
        let palette = [0u16; 256];
        let format = PixelFormat::Indexed { palette: &palette, mask: 0xFF, shift_mask: 0 };
        let frame = LogicalFrame::new(4, 2, 6, format, &mut pixels).unwrap();
        assert_eq!(frame.row(1), &[7, 0, 0, 0]);
    }

    #[test]
    fn test_resolve_dual_palette() {
        let mut pixels = [0x01u8, 0x81];
        let palette = [10u16, 11, 20, 21];
        let format = PixelFormat::Indexed { palette: &palette, mask: 0x01, shift_mask: 0x80 };
        let frame = LogicalFrame::new(2, 1, 2, format, &mut pixels).unwrap();
        let row = frame.row(0);
        assert_eq!(frame.resolve(row, 0), 11);
        assert_eq!(frame.resolve(row, 1), 21);
    }

    #[test]
    fn test_blocks_skip_repeats() {
        let mut table = DiffTable::new();
        table.lines_mut()[0] = LineDiff { left: 1, width: 2, repeat: 3 };
        table.lines_mut()[3] = LineDiff { left: 0, width: 0, repeat: 1 };
        let blocks: Vec<_> = table.blocks(4).collect();
        assert_eq!(blocks, [(0, LineDiff { left: 1, width: 2, repeat: 3 }), (3, LineDiff { left: 0, width: 0, repeat: 1 })]);
    }

    #[test]
    fn test_clear_row_fills_bytes() {
        let mut pixels = [5u8; 8];
        let frame = LogicalFrame::new(2, 2, 4, PixelFormat::Rgb565, &mut pixels).unwrap().with_clear(0);
        unsafe { frame.clear_row(1) };
        assert_eq!(frame.row(0), &[5, 5, 5, 5]);
        assert_eq!(frame.row(1), &[0, 0, 0, 0]);
    }
}
