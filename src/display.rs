//! Display configuration for Pimoroni PIM715 Display Pack 2.8" (ST7789).
//!
//! Pin mapping for PIM715:
//! - DC: GPIO16
//! - CS: GPIO17
//! - CLK: GPIO18 (SPI0 CLK)
//! - MOSI: GPIO19 (SPI0 TX)
//! - Backlight: GPIO20
//! - Buttons: A=12, B=13, X=14, Y=15 (active-low)

use embassy_rp::spi::{Config as SpiConfig, Phase, Polarity};

/// SPI clock for the panel link (ST7789 datasheet maximum).
pub const SPI_FREQUENCY_HZ: u32 = 62_500_000;

/// SPI configuration for the ST7789 display: mode 3 at 62.5 MHz.
pub fn display_spi_config() -> SpiConfig {
    let mut config = SpiConfig::default();
    config.frequency = SPI_FREQUENCY_HZ;
    config.phase = Phase::CaptureOnSecondTransition;
    config.polarity = Polarity::IdleHigh;
    config
}
