//! Color constants used by the pipeline and the demo machine.
//!
//! Rgb565 uses 16 bits per pixel: 5 bits red, 6 bits green, 5 bits blue.
//! Palettes store native-order values; the panel receives them big-endian.

use embedded_graphics::pixelcolor::raw::RawU16;
use embedded_graphics::pixelcolor::{Rgb565, RgbColor};
use embedded_graphics::prelude::*;

/// Screen fill used around a scaled image and on every geometry change.
pub const BLACK: Rgb565 = Rgb565::BLACK;

pub const WHITE: Rgb565 = Rgb565::WHITE;

/// Four-shade green palette, lightest first (DMG style).
pub const DMG_SHADES: [Rgb565; 4] = [
    Rgb565::new(19, 47, 1),
    Rgb565::new(16, 42, 1),
    Rgb565::new(6, 24, 6),
    Rgb565::new(1, 12, 1),
];

/// Native-order raw value of a color.
#[inline]
pub fn raw(color: Rgb565) -> u16 { RawU16::from(color).into_inner() }

/// Raw value of a color in panel (big-endian) order.
#[inline]
pub fn wire(color: Rgb565) -> u16 { raw(color).to_be() }
