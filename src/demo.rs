//! Stand-in for an emulated machine.
//!
//! Renders a 160x144 four-shade indexed frame, the way a DMG-style core
//! would hand one over: a mostly static scene with a few small moving parts,
//! which keeps the diff engine on its partial-update path.

use core::convert::Infallible;
use core::fmt::Write;

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::{Gray2, GrayColor};
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Circle, Line, PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};
#[allow(unused_imports)] // std's inherent methods win on host test builds
use micromath::F32Ext;
use profont::PROFONT_9_POINT;

use crate::colors;

pub const DEMO_WIDTH: u16 = 160;
pub const DEMO_HEIGHT: u16 = 144;
/// Bytes in one demo frame (one byte per pixel, no row padding).
pub const DEMO_FRAME_BYTES: usize = DEMO_WIDTH as usize * DEMO_HEIGHT as usize;

/// Valid index bits of a demo pixel.
pub const DEMO_MASK: u8 = 0x03;

/// Native RGB565 palette for demo frames, lightest shade at index 0.
pub fn dmg_palette() -> [u16; 4] { colors::DMG_SHADES.map(colors::raw) }

/// `DrawTarget` over a one-byte-per-pixel buffer.
///
/// Gray2 white (luma 3) is stored as index 0 so palettes can list shades
/// lightest first.
pub struct IndexedCanvas<'b> {
    pixels: &'b mut [u8],
    size: Size,
}

impl<'b> IndexedCanvas<'b> {
    pub fn new(
        pixels: &'b mut [u8],
        width: u16,
        height: u16,
    ) -> Self {
        let height = height.min((pixels.len() / usize::from(width.max(1))) as u16);
        Self {
            pixels,
            size: Size::new(u32::from(width), u32::from(height)),
        }
    }
}

impl OriginDimensions for IndexedCanvas<'_> {
    fn size(&self) -> Size { self.size }
}

impl DrawTarget for IndexedCanvas<'_> {
    type Color = Gray2;
    type Error = Infallible;

    fn draw_iter<I>(
        &mut self,
        pixels: I,
    ) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let width = self.size.width as i32;
        let height = self.size.height as i32;
        for Pixel(point, color) in pixels {
            if (0..width).contains(&point.x) && (0..height).contains(&point.y) {
                self.pixels[(point.y * width + point.x) as usize] = 3 - color.luma();
            }
        }
        Ok(())
    }
}

/// Demo "machine": one call to [`render`](Self::render) per emulated frame.
pub struct DemoMachine {
    frame: u32,
}

impl DemoMachine {
    pub const fn new() -> Self { Self { frame: 0 } }

    /// Frames rendered so far.
    #[inline]
    pub fn frame_count(&self) -> u32 { self.frame }

    /// Render the next frame into `pixels` (at least [`DEMO_FRAME_BYTES`]).
    pub fn render(
        &mut self,
        pixels: &mut [u8],
    ) {
        let mut canvas = IndexedCanvas::new(pixels, DEMO_WIDTH, DEMO_HEIGHT);
        // Drawing into memory cannot fail.
        let _ = self.draw(&mut canvas);
        self.frame = self.frame.wrapping_add(1);
    }

    fn draw(
        &self,
        canvas: &mut IndexedCanvas<'_>,
    ) -> Result<(), Infallible> {
        canvas.clear(Gray2::WHITE)?;

        let title = MonoTextStyle::new(&PROFONT_9_POINT, Gray2::BLACK);
        Text::with_baseline("RETRO DISPLAY", Point::new(36, 4), title, Baseline::Top).draw(canvas)?;

        // Ground and a static block to look like a level.
        Line::new(Point::new(0, 120), Point::new(159, 120))
            .into_styled(PrimitiveStyle::with_stroke(Gray2::new(1), 2))
            .draw(canvas)?;
        Rectangle::new(Point::new(112, 96), Size::new(24, 24))
            .into_styled(PrimitiveStyle::with_fill(Gray2::new(2)))
            .draw(canvas)?;

        // Bouncing sprite.
        let t = self.frame as f32 / 30.0;
        let x = 70.0 + 50.0 * t.sin();
        let y = 100.0 - 40.0 * (t * 2.0).sin().abs();
        Circle::new(Point::new(x as i32, y as i32), 12)
            .into_styled(PrimitiveStyle::with_fill(Gray2::BLACK))
            .draw(canvas)?;

        // Frame counter.
        let mut counter: heapless::String<16> = heapless::String::new();
        let _ = write!(counter, "{:05}", self.frame);
        let small = MonoTextStyle::new(&PROFONT_9_POINT, Gray2::new(1));
        Text::with_baseline(&counter, Point::new(4, 128), small, Baseline::Top).draw(canvas)?;
        Ok(())
    }
}

impl Default for DemoMachine {
    fn default() -> Self { Self::new() }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================
