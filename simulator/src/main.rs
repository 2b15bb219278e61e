//! Retro display simulator for Windows/Desktop.
//!
//! Runs the real pipeline on host threads: the main thread plays the
//! emulated machine and the UI, one thread runs the Update Task and one
//! plays the DMA engine feeding a panel model. The window shows what the
//! panel model received.
//!
//! # Keys
//!
//! - **S**: Cycle scale mode
//! - **F**: Cycle filter mode
//! - **A**: Cycle the Custom aspect ratio
//! - **C**: Clear the screen and force a full redraw
//! - **P**: Print pipeline statistics

// Crate-level lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod sim_bus;
mod timing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::pixelcolor::raw::RawU16;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use embedded_graphics_simulator::sdl2::Keycode;
use embedded_graphics_simulator::{OutputSettingsBuilder, SimulatorDisplay, SimulatorEvent, Window};
use retro_display::demo::{DEMO_FRAME_BYTES, DEMO_HEIGHT, DEMO_MASK, DEMO_WIDTH, DemoMachine, dmg_palette};
use retro_display::geometry::ScreenSize;
use retro_display::log_buffer::{self, LogLevel};
use retro_display::panel_model::PanelModel;
use retro_display::settings::AspectRatio;
use retro_display::{BusLock, DisplayPipeline, DmaPools, LogicalFrame, PixelFormat, UpdateTask, colors};

use crate::sim_bus::{HostClock, SimBus, SimPipeline, run_dma};
use crate::timing::{FRAME_TIME, STATS_INTERVAL};

static POOLS: DmaPools = DmaPools::new();
static BUS_LOCK: BusLock = BusLock::new();

const CUSTOM_ASPECTS: [AspectRatio; 3] = [AspectRatio::new(4, 3), AspectRatio::new(3, 2), AspectRatio::new(1, 1)];

fn main() {
    let (bus, rx) = SimBus::new();
    let pipeline: SimPipeline = DisplayPipeline::new(bus, HostClock::new(), &POOLS, &BUS_LOCK);
    let panel = Mutex::new(Box::new(PanelModel::new(ScreenSize::PANEL)));
    let stop = AtomicBool::new(false);

    let ok = thread::scope(|s| {
        let dma = s.spawn(|| run_dma(rx, &pipeline, &panel, &stop));
        // A failed Update Task leaves the producer waiting on the mailbox,
        // so it ends the process right away.
        let update = s.spawn(|| {
            if let Err(e) = UpdateTask::new(&pipeline).run() {
                eprintln!("update task failed: {e}");
                std::process::exit(1);
            }
        });

        run_machine(&pipeline, &panel);

        pipeline.shutdown();
        let mut ok = true;
        if update.join().is_err() {
            eprintln!("update task panicked");
            ok = false;
        }
        if let Err(e) = pipeline.drain() {
            eprintln!("final drain failed: {e}");
            ok = false;
        }
        stop.store(true, Ordering::Release);
        match dma.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                eprintln!("DMA completion failed: {e}");
                ok = false;
            }
            Err(_) => {
                eprintln!("DMA thread panicked");
                ok = false;
            }
        }
        ok
    });
    print_stats(&pipeline);
    if !ok {
        std::process::exit(1);
    }
}

/// Producer loop plus window. Returns when the window is closed.
fn run_machine(
    pipeline: &SimPipeline,
    panel: &Mutex<Box<PanelModel>>,
) {
    let screen = ScreenSize::PANEL;
    let mut display: SimulatorDisplay<Rgb565> =
        SimulatorDisplay::new(Size::new(u32::from(screen.width), u32::from(screen.height)));
    let output_settings = OutputSettingsBuilder::new().scale(2).build();
    let mut window = Window::new("Retro Display Sim", &output_settings);

    if let Err(e) = pipeline.clear(colors::BLACK) {
        eprintln!("initial clear failed: {e}");
        return;
    }

    let palette = dmg_palette();
    let format = PixelFormat::Indexed {
        palette: &palette,
        mask: DEMO_MASK,
        shift_mask: 0,
    };
    let mut buffer_a = vec![0u8; DEMO_FRAME_BYTES];
    let mut buffer_b = vec![0u8; DEMO_FRAME_BYTES];
    let frames = LogicalFrame::new(DEMO_WIDTH, DEMO_HEIGHT, usize::from(DEMO_WIDTH), format, &mut buffer_a)
        .and_then(|a| Ok((a, LogicalFrame::new(DEMO_WIDTH, DEMO_HEIGHT, usize::from(DEMO_WIDTH), format, &mut buffer_b)?)));
    let (mut frame_a, mut frame_b) = match frames {
        Ok(frames) => frames,
        Err(e) => {
            eprintln!("bad demo frame: {e}");
            return;
        }
    };
    let (mut current, mut previous) = (&mut frame_a, &mut frame_b);

    let mut machine = DemoMachine::new();
    let mut aspect_idx = 0;
    let mut first = true;
    let mut last_stats = Instant::now();
    let mut last_log = None;

    loop {
        let frame_start = Instant::now();

        for ev in window.events() {
            match ev {
                SimulatorEvent::Quit => return,
                SimulatorEvent::KeyDown { keycode, repeat, .. } => {
                    if repeat {
                        continue;
                    }
                    match keycode {
                        Keycode::S => pipeline.set_scale_mode(pipeline.settings().scale_mode().next()),
                        Keycode::F => pipeline.set_filter_mode(pipeline.settings().filter_mode().next()),
                        Keycode::A => {
                            aspect_idx = (aspect_idx + 1) % CUSTOM_ASPECTS.len();
                            pipeline.set_aspect_override(CUSTOM_ASPECTS[aspect_idx]);
                        }
                        Keycode::C => {
                            if let Err(e) = pipeline.clear(colors::BLACK) {
                                eprintln!("clear failed: {e}");
                                return;
                            }
                            pipeline.settings().request_refresh();
                        }
                        Keycode::P => print_stats(pipeline),
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        machine.render(current.pixels_mut());
        let prior = if first { None } else { Some(&*previous) };
        // SAFETY: `current` is left alone until the next `queue_update`
        // returns, and demo frames have no clear byte.
        unsafe { pipeline.queue_update(current, prior) };
        first = false;
        std::mem::swap(&mut current, &mut previous);

        show_panel(&mut display, &panel.lock().unwrap_or_else(PoisonError::into_inner));
        window.update(&display);

        last_log = print_new_logs(last_log);
        if last_stats.elapsed() >= STATS_INTERVAL {
            print_stats(pipeline);
            last_stats = Instant::now();
        }

        if let Some(rest) = FRAME_TIME.checked_sub(frame_start.elapsed()) {
            thread::sleep(rest);
        }
    }
}

/// Copy the panel model into the window's framebuffer.
fn show_panel(
    display: &mut SimulatorDisplay<Rgb565>,
    panel: &PanelModel,
) {
    let screen = panel.screen();
    let area = Rectangle::new(Point::zero(), Size::new(u32::from(screen.width), u32::from(screen.height)));
    let colors = (0..screen.height).flat_map(|y| panel.row(y).iter().map(|&raw| Rgb565::from(RawU16::new(raw))));
    display.fill_contiguous(&area, colors).ok();
}

/// Echo log ring entries newer than `last` to stdout.
fn print_new_logs(last: Option<u32>) -> Option<u32> {
    let mut newest = last;
    for entry in log_buffer::snapshot::<{ log_buffer::LOG_ENTRIES }>() {
        if last.is_some_and(|seen| entry.sequence.wrapping_sub(seen) as i32 <= 0) {
            continue;
        }
        let line = format!("[{}] {}", entry.level.prefix(), entry.message);
        if matches!(entry.level, LogLevel::Warn | LogLevel::Error) {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
        newest = Some(entry.sequence);
    }
    newest
}

fn print_stats(pipeline: &SimPipeline) {
    let stats = pipeline.stats().snapshot();
    println!(
        "frames queued={} drawn={} full={} partial={} empty={} last_lines={} waits={}",
        stats.frames_queued(),
        stats.frames_drawn,
        stats.frames_full,
        stats.frames_partial,
        stats.frames_empty,
        stats.last_lines_changed,
        stats.buffer_waits
    );
}
