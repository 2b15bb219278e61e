//! Retro display firmware for Raspberry Pi Pico 2 (RP2350) + PIM715.
//!
//! Runs the demo machine at 60 Hz and streams its frames to the ST7789
//! through the display update pipeline.
//!
//! # Architecture
//!
//! - Core 0, thread mode: demo machine, `queue_update`, buttons
//! - Core 0, SWI_IRQ_1 executor: bus driver task (DMA transfers, completions)
//! - Core 1: Update Task (scaling, filtering, line buffer fills)
//!
//! # Button Controls
//!
//! - **A**: Cycle scale mode (Off → Fit → Fill → Custom)
//! - **B**: Cycle filter mode (None → X → Y → XY)
//! - **X**: Log pipeline statistics
//! - **Y**: Cycle the Custom aspect ratio

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]
// Crate-level lints (match lib.rs for consistency)
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

#[cfg(target_arch = "arm")]
#[macro_use]
extern crate retro_display;

#[cfg(target_arch = "arm")]
mod bus;
#[cfg(target_arch = "arm")]
mod button;
#[cfg(target_arch = "arm")]
mod display;
#[cfg(target_arch = "arm")]
mod st7789;

/// Host builds get a stub so `cargo test` can build every target.
#[cfg(not(target_arch = "arm"))]
fn main() {
    println!("firmware targets the RP2350; on the desktop run the `simulator` package instead");
}

#[cfg(target_arch = "arm")]
mod firmware {
    use core::ptr::addr_of_mut;

    use defmt::info;
    use embassy_executor::{InterruptExecutor, Spawner};
    use embassy_rp::gpio::{Input, Level, Output, Pull};
    use embassy_rp::interrupt;
    use embassy_rp::interrupt::{InterruptExt, Priority};
    use embassy_rp::multicore::{Stack, spawn_core1};
    use embassy_rp::spi::Spi;
    use embassy_time::{Duration, Instant, Ticker};
    use retro_display::demo::{DEMO_FRAME_BYTES, DEMO_HEIGHT, DEMO_MASK, DEMO_WIDTH, DemoMachine, dmg_palette};
    use retro_display::settings::AspectRatio;
    use retro_display::{BusLock, DisplayPipeline, DmaPools, LogicalFrame, PixelFormat, UpdateTask, colors};
    use static_cell::StaticCell;
    use {defmt_rtt as _, panic_probe as _};

    use crate::bus::{ChannelBus, EmbassyClock, FirmwarePipeline, bus_driver_task};
    use crate::button::ButtonState;
    use crate::display::display_spi_config;
    use crate::st7789::St7789;

    /// Emulated machine frame rate.
    const FRAME_RATE_HZ: u64 = 60;

    /// Interval between periodic statistics logs.
    const STATS_INTERVAL: Duration = Duration::from_secs(5);

    /// Aspect ratios cycled by the Y button for `ScaleMode::Custom`.
    const CUSTOM_ASPECTS: [AspectRatio; 3] = [AspectRatio::new(4, 3), AspectRatio::new(3, 2), AspectRatio::new(1, 1)];

    static POOLS: DmaPools = DmaPools::new();
    static BUS_LOCK: BusLock = BusLock::new();
    static PIPELINE: StaticCell<FirmwarePipeline> = StaticCell::new();

    /// High-priority executor for the bus driver, so completions preempt the
    /// busy-waiting producer on core 0.
    static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

    static mut CORE1_STACK: Stack<8192> = Stack::new();

    /// Logical frames, alternated between "current" and "previous".
    static mut FRAME_A: [u8; DEMO_FRAME_BYTES] = [0u8; DEMO_FRAME_BYTES];
    static mut FRAME_B: [u8; DEMO_FRAME_BYTES] = [0u8; DEMO_FRAME_BYTES];

    #[interrupt]
    unsafe fn SWI_IRQ_1() {
        // SAFETY: the executor is started on this interrupt in `main`.
        unsafe { EXECUTOR_HIGH.on_interrupt() }
    }

    #[embassy_executor::main]
    async fn main(_spawner: Spawner) {
        info!("Retro display starting...");
        let p = embassy_rp::init(Default::default());

        // PIM715 pinout: CS=17, DC=16, CLK=18, MOSI=19, Backlight=20
        let cs = Output::new(p.PIN_17, Level::High);
        let dc = Output::new(p.PIN_16, Level::Low);
        let _backlight = Output::new(p.PIN_20, Level::High);

        // TX-only SPI with DMA, the panel has no MISO
        let spi = Spi::new_txonly(p.SPI0, p.PIN_18, p.PIN_19, p.DMA_CH0, display_spi_config());
        let mut panel = St7789::new(spi, dc, cs);
        panel.init().await;
        log_info!("Display initialized");

        let pipeline: &'static FirmwarePipeline =
            PIPELINE.init(DisplayPipeline::new(ChannelBus, EmbassyClock, &POOLS, &BUS_LOCK));

        interrupt::SWI_IRQ_1.set_priority(Priority::P2);
        let high_spawner = EXECUTOR_HIGH.start(interrupt::SWI_IRQ_1);
        high_spawner.spawn(bus_driver_task(panel, pipeline)).unwrap();
        info!("Bus driver task spawned");

        if let Err(e) = pipeline.clear(colors::BLACK) {
            defmt::panic!("initial clear failed: {}", e);
        }

        // SAFETY: the stack is handed to core 1 exactly once.
        let stack = unsafe { &mut *addr_of_mut!(CORE1_STACK) };
        spawn_core1(p.CORE1, stack, move || {
            let mut task = UpdateTask::new(pipeline);
            if let Err(e) = task.run() {
                defmt::panic!("update task failed: {}", e);
            }
            loop {
                cortex_m::asm::wfe();
            }
        });
        info!("Update task started on core 1");

        // Buttons (active-low with internal pull-up)
        let btn_a = Input::new(p.PIN_12, Pull::Up);
        let btn_b = Input::new(p.PIN_13, Pull::Up);
        let btn_x = Input::new(p.PIN_14, Pull::Up);
        let btn_y = Input::new(p.PIN_15, Pull::Up);
        let mut btn_a_state = ButtonState::new();
        let mut btn_b_state = ButtonState::new();
        let mut btn_x_state = ButtonState::new();
        let mut btn_y_state = ButtonState::new();

        let palette = dmg_palette();
        let format = PixelFormat::Indexed {
            palette: &palette,
            mask: DEMO_MASK,
            shift_mask: 0,
        };
        // SAFETY: main never returns and is the only user of the frame buffers.
        let (buffer_a, buffer_b) = unsafe { (&mut *addr_of_mut!(FRAME_A), &mut *addr_of_mut!(FRAME_B)) };
        let frame_a = LogicalFrame::new(DEMO_WIDTH, DEMO_HEIGHT, usize::from(DEMO_WIDTH), format, buffer_a);
        let frame_b = LogicalFrame::new(DEMO_WIDTH, DEMO_HEIGHT, usize::from(DEMO_WIDTH), format, buffer_b);
        let (mut frame_a, mut frame_b) = match (frame_a, frame_b) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => defmt::panic!("bad demo frame: {}", e),
        };
        let (mut current, mut previous) = (&mut frame_a, &mut frame_b);

        let mut machine = DemoMachine::new();
        let mut aspect_idx = 0;
        let mut first = true;
        let mut last_stats = Instant::now();
        let mut ticker = Ticker::every(Duration::from_hz(FRAME_RATE_HZ));

        loop {
            if btn_a_state.just_pressed(btn_a.is_low()) {
                pipeline.set_scale_mode(pipeline.settings().scale_mode().next());
            }
            if btn_b_state.just_pressed(btn_b.is_low()) {
                pipeline.set_filter_mode(pipeline.settings().filter_mode().next());
            }
            if btn_x_state.just_pressed(btn_x.is_low()) {
                log_stats(pipeline);
            }
            if btn_y_state.just_pressed(btn_y.is_low()) {
                aspect_idx = (aspect_idx + 1) % CUSTOM_ASPECTS.len();
                let ratio = CUSTOM_ASPECTS[aspect_idx];
                log_info!("custom aspect {}:{}", ratio.num, ratio.den);
                pipeline.set_aspect_override(ratio);
            }

            // `current` was handed over two calls ago; queuing `previous`
            // returned, so the Update Task is done with it.
            machine.render(current.pixels_mut());
            let prior = if first { None } else { Some(&*previous) };
            // SAFETY: `current` is not touched again until the next
            // `queue_update` returns, and the demo frames have no clear byte.
            unsafe { pipeline.queue_update(current, prior) };
            first = false;
            core::mem::swap(&mut current, &mut previous);

            if last_stats.elapsed() >= STATS_INTERVAL {
                log_stats(pipeline);
                last_stats = Instant::now();
            }

            ticker.next().await;
        }
    }

    fn log_stats(pipeline: &FirmwarePipeline) {
        let stats = pipeline.stats().snapshot();
        info!(
            "frames queued={} drawn={} full={} partial={} empty={} waits={}",
            stats.frames_queued(),
            stats.frames_drawn,
            stats.frames_full,
            stats.frames_partial,
            stats.frames_empty,
            stats.buffer_waits
        );
    }
}
