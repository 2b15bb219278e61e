//! ST7789 link for embassy-rp: panel bring-up plus the transfer primitive
//! the bus driver task runs for every queued transaction.
//!
//! Window addressing and RAMWR are issued by the pipeline itself (see
//! `retro_display::panel`), so after [`St7789::init`] this driver only toggles
//! D/C and CS around each DMA write.

use embassy_rp::gpio::Output;
use embassy_rp::peripherals::SPI0;
use embassy_rp::spi::{Async, Spi};
use embassy_time::Timer;
use retro_display::{DcLine, Transfer};

// ST7789 bring-up commands
const SWRESET: u8 = 0x01;
const SLPOUT: u8 = 0x11;
const NORON: u8 = 0x13;
const INVON: u8 = 0x21;
const DISPON: u8 = 0x29;
const MADCTL: u8 = 0x36;
const COLMOD: u8 = 0x3A;

// MADCTL flags
const MADCTL_MX: u8 = 0x40; // Column address order
const MADCTL_MV: u8 = 0x20; // Row/column exchange

/// Owns the SPI peripheral and the panel control pins.
pub struct St7789<'d> {
    spi: Spi<'d, SPI0, Async>,
    dc: Output<'d>,
    cs: Output<'d>,
}

impl<'d> St7789<'d> {
    pub fn new(
        spi: Spi<'d, SPI0, Async>,
        dc: Output<'d>,
        cs: Output<'d>,
    ) -> Self {
        Self { spi, dc, cs }
    }

    /// Reset the panel and leave it in landscape RGB565 mode.
    pub async fn init(&mut self) {
        self.write(DcLine::Command, &[SWRESET]).await;
        Timer::after_millis(150).await;

        self.write(DcLine::Command, &[SLPOUT]).await;
        Timer::after_millis(10).await;

        // 16 bits per pixel
        self.write(DcLine::Command, &[COLMOD]).await;
        self.write(DcLine::Data, &[0x55]).await;

        // 90° rotation: MV=1, MX=1
        self.write(DcLine::Command, &[MADCTL]).await;
        self.write(DcLine::Data, &[MADCTL_MV | MADCTL_MX]).await;

        // Inversion on (required for PIM715)
        self.write(DcLine::Command, &[INVON]).await;
        Timer::after_millis(10).await;

        self.write(DcLine::Command, &[NORON]).await;
        Timer::after_millis(10).await;

        self.write(DcLine::Command, &[DISPON]).await;
        Timer::after_millis(10).await;
    }

    /// Run one queued transfer. Returns the number of bytes moved.
    pub async fn transfer(
        &mut self,
        transfer: &Transfer<'_>,
    ) -> usize {
        self.write(transfer.line, transfer.bytes).await
    }

    async fn write(
        &mut self,
        line: DcLine,
        bytes: &[u8],
    ) -> usize {
        self.cs.set_low();
        match line {
            DcLine::Command => self.dc.set_low(),
            DcLine::Data => self.dc.set_high(),
        }
        // Single bytes go out blocking, DMA setup costs more than it saves
        let result = if bytes.len() == 1 {
            self.spi.blocking_write(bytes)
        } else {
            self.spi.write(bytes).await
        };
        self.cs.set_high();
        match result {
            Ok(()) => bytes.len(),
            Err(_) => 0,
        }
    }
}
