//! The display pipeline context shared by producer, Update Task and bus driver.
//!
//! One [`DisplayPipeline`] holds everything the three contexts share: the
//! panel (with its scheduler and pools), the scale/filter settings, the
//! published line caps, the frame mailbox and the counters. The producer
//! calls [`queue_update`](DisplayPipeline::queue_update) once per frame, the
//! [`UpdateTask`](crate::update_task::UpdateTask) drains the mailbox, and the
//! bus driver reports finished transfers through
//! [`complete`](DisplayPipeline::complete).

use core::ptr::NonNull;

use embedded_graphics::pixelcolor::Rgb565;

use crate::bus_lock::BusLock;
use crate::clock::Clock;
use crate::diff::diff_frames;
use crate::error::PipelineError;
use crate::frame::{LineDiff, LogicalFrame};
use crate::geometry::{LineCaps, ScreenSize};
use crate::mailbox::Mailbox;
use crate::panel::Panel;
pub use crate::scheduler::DmaPools;
use crate::scheduler::{Bus, BusScheduler, TransactionId};
use crate::settings::{AspectRatio, DisplaySettings, FilterMode, ScaleMode};
use crate::stats::PipelineStats;
use crate::writer;

/// How much of a queued frame has to be resent.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum UpdateKind {
    Full,
    Partial,
    Empty,
}

/// Frame handed to the Update Task.
#[derive(Clone, Copy)]
pub(crate) struct FramePtr(NonNull<LogicalFrame<'static>>);

// SAFETY: the frame is only dereferenced by the Update Task, under the
// contract of `DisplayPipeline::queue_update`.
unsafe impl Send for FramePtr {}

impl FramePtr {
    /// # Safety
    ///
    /// The frame must still be alive and not mutated elsewhere.
    pub(crate) unsafe fn as_ref<'f>(&self) -> &'f LogicalFrame<'f> {
        // SAFETY: upheld by the caller.
        unsafe { self.0.cast::<LogicalFrame<'f>>().as_ref() }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Message {
    Frame(FramePtr),
    Shutdown,
}

/// Shared state of the display update pipeline.
pub struct DisplayPipeline<'a, B, C> {
    panel: Panel<'a, B, C>,
    settings: DisplaySettings,
    line_caps: LineCaps,
    mailbox: Mailbox<Message>,
    stats: PipelineStats,
}

impl<'a, B, C> DisplayPipeline<'a, B, C>
where
    B: Bus<'a>,
    C: Clock,
{
    /// Pipeline for the full compiled panel size.
    pub fn new(
        bus: B,
        clock: C,
        pools: &'a DmaPools,
        lock: &'a BusLock,
    ) -> Self {
        Self::with_screen(bus, clock, pools, lock, ScreenSize::PANEL)
    }

    pub fn with_screen(
        bus: B,
        clock: C,
        pools: &'a DmaPools,
        lock: &'a BusLock,
        screen: ScreenSize,
    ) -> Self {
        Self {
            panel: Panel::new(BusScheduler::new(bus, clock, pools, lock), screen),
            settings: DisplaySettings::default(),
            line_caps: LineCaps::new(),
            mailbox: Mailbox::new(),
            stats: PipelineStats::new(),
        }
    }

    #[inline]
    pub fn panel(&self) -> &Panel<'a, B, C> { &self.panel }

    #[inline]
    pub fn settings(&self) -> &DisplaySettings { &self.settings }

    #[inline]
    pub fn stats(&self) -> &PipelineStats { &self.stats }

    #[inline]
    pub fn line_caps(&self) -> &LineCaps { &self.line_caps }

    #[inline]
    pub(crate) fn mailbox(&self) -> &Mailbox<Message> { &self.mailbox }

    #[inline]
    pub fn clock(&self) -> &C { self.panel.scheduler().clock() }

    /// Diff `current` against `previous` and hand it to the Update Task.
    ///
    /// Without a previous frame, or while a refresh is pending, the whole
    /// frame is marked dirty. Blocks until the Update Task has finished the
    /// frame queued before this one.
    ///
    /// # Safety
    ///
    /// `current` is read (and, with a clear byte, written) by the Update
    /// Task after this call returns. The caller must keep it alive and must
    /// not touch its pixels until the next `queue_update` call returns or
    /// [`drain_frames`](Self::drain_frames) has returned. When `current` has
    /// a clear byte, `previous` must be `None`.
    pub unsafe fn queue_update(
        &self,
        current: &mut LogicalFrame<'_>,
        previous: Option<&LogicalFrame<'_>>,
    ) -> UpdateKind {
        let (width, height) = (current.width(), current.height());

        let lines_changed = match previous {
            Some(previous) if !self.settings.refresh_pending() => {
                let caps = self.settings.filtering().then_some(&self.line_caps);
                diff_frames(current, previous, caps)
            }
            _ => {
                for line in &mut current.diff_mut().lines_mut()[..usize::from(height)] {
                    *line = LineDiff { left: 0, width: 0, repeat: 1 };
                }
                current.mark_full();
                height
            }
        };

        let full = LineDiff { left: 0, width, repeat: height };
        let kind = if lines_changed == height || current.diff().lines()[0] == full {
            UpdateKind::Full
        } else if lines_changed == 0 {
            UpdateKind::Empty
        } else {
            UpdateKind::Partial
        };
        self.stats.record_update(kind, lines_changed);

        let frame = FramePtr(NonNull::from(&*current).cast());
        self.mailbox.post(self.clock(), Message::Frame(frame));
        kind
    }

    /// Wait until the Update Task is done with every queued frame.
    pub fn drain_frames(&self) { self.mailbox.wait_empty(self.clock()); }

    /// Copy native-order RGB565 pixels straight to the screen, 1:1.
    ///
    /// Meant for static UI drawn while no frames are being queued.
    pub fn write(
        &self,
        left: u16,
        top: u16,
        width: u16,
        height: u16,
        pixels: &[u16],
    ) -> Result<(), PipelineError> {
        self.drain_frames();
        self.drain()?;
        writer::write_pixels(&self.panel, left, top, width, height, pixels)?;
        self.drain()
    }

    /// Fill the whole screen with `color`.
    pub fn clear(
        &self,
        color: Rgb565,
    ) -> Result<(), PipelineError> {
        self.drain_frames();
        self.drain()?;
        writer::fill_screen(&self.panel, color)?;
        self.drain()
    }

    pub fn set_scale_mode(
        &self,
        mode: ScaleMode,
    ) {
        log_info!("scale mode {}", mode.label());
        self.settings.set_scale_mode(mode);
    }

    pub fn set_filter_mode(
        &self,
        mode: FilterMode,
    ) {
        log_info!("filter mode {}", mode.label());
        self.settings.set_filter_mode(mode);
    }

    pub fn set_aspect_override(
        &self,
        ratio: AspectRatio,
    ) {
        self.settings.set_aspect_override(ratio);
    }

    /// Completion entry point for the bus driver.
    #[inline]
    pub fn complete(
        &self,
        id: TransactionId,
        transferred: usize,
    ) -> Result<(), PipelineError> {
        self.panel.scheduler().complete(id, transferred)
    }

    /// Wait until no transfer is in flight.
    #[inline]
    pub fn drain(&self) -> Result<(), PipelineError> { self.panel.scheduler().drain() }

    /// Ask the Update Task to return once it has finished the pending frame.
    pub fn shutdown(&self) {
        log_info!("display pipeline shutting down");
        self.mailbox.post(self.clock(), Message::Shutdown);
    }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::colors;
    use crate::frame::PixelFormat;
    use crate::testing::{RecordingBus, StdClock, with_completions};
    use crate::update_task::UpdateTask;

    type TestPipeline<'a> = DisplayPipeline<'a, RecordingBus, StdClock>;

    const PALETTE: [u16; 4] = [0xFFFF, 0xAD55, 0x52AA, 0x0000];

    fn indexed<'a>(pixels: &'a mut [u8]) -> LogicalFrame<'a> {
        let format = PixelFormat::Indexed { palette: &PALETTE, mask: 0x03, shift_mask: 0 };
        LogicalFrame::new(160, 144, 160, format, pixels).unwrap()
    }

    /// Run `producer` with an Update Task and a completion thread behind it.
    fn with_update_task<R>(
        pipeline: &TestPipeline<'_>,
        producer: impl FnOnce() -> R,
    ) -> R {
        with_completions(
            pipeline.panel().scheduler().bus(),
            |id, len| pipeline.complete(id, len).unwrap(),
            || {
                thread::scope(|s| {
                    let task = s.spawn(|| UpdateTask::new(pipeline).run());
                    let result = producer();
                    pipeline.shutdown();
                    task.join().unwrap().unwrap();
                    pipeline.drain().unwrap();
                    result
                })
            },
        )
    }

    #[test]
    fn test_first_frame_is_full_then_self_diff_is_empty() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let pipeline = DisplayPipeline::new(RecordingBus::new(), StdClock::new(), &pools, &lock);
        let mut a = vec![1u8; 160 * 144];
        let mut b = a.clone();

        let kinds = with_update_task(&pipeline, || {
            let mut first = indexed(&mut a);
            let mut second = indexed(&mut b);
            let k1 = unsafe { pipeline.queue_update(&mut first, None) };
            pipeline.drain_frames();
            let k2 = unsafe { pipeline.queue_update(&mut second, Some(&first)) };
            pipeline.drain_frames();
            (k1, k2)
        });

        assert_eq!(kinds, (UpdateKind::Full, UpdateKind::Empty));
        let stats = pipeline.stats().snapshot();
        assert_eq!((stats.frames_full, stats.frames_empty, stats.frames_drawn), (1, 1, 2));
        assert_eq!(stats.last_lines_changed, 0);
    }

    #[test]
    fn test_square_revert_is_partial() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let pipeline = DisplayPipeline::new(RecordingBus::new(), StdClock::new(), &pools, &lock);
        pipeline.set_filter_mode(FilterMode::None);
        let mut a = vec![0u8; 160 * 144];
        let mut b = vec![0u8; 160 * 144];
        a[10 * 160 + 10..10 * 160 + 18].fill(3);

        let (kind, block) = with_update_task(&pipeline, || {
            let mut square = indexed(&mut a);
            let mut background = indexed(&mut b);
            unsafe { pipeline.queue_update(&mut square, None) };
            pipeline.drain_frames();
            let kind = unsafe { pipeline.queue_update(&mut background, Some(&square)) };
            pipeline.drain_frames();
            let block = background.diff().blocks(144).find(|(_, d)| d.width > 0);
            (kind, block)
        });

        assert_eq!(kind, UpdateKind::Partial);
        let (y, diff) = block.unwrap();
        assert_eq!(y, 10);
        assert_eq!(diff.repeat, 1);
        assert!(diff.left <= 10 && diff.left + diff.width >= 18);

        // Fill scaling doubles columns: the square is gone from the screen.
        pipeline.panel().scheduler().bus().panel(|model| {
            let white = PALETTE[0];
            assert!((17..19).all(|y| model.row(y)[16..40].iter().all(|&p| p == white)));
        });
    }

    #[test]
    fn test_large_change_is_full() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let pipeline = DisplayPipeline::new(RecordingBus::new(), StdClock::new(), &pools, &lock);
        let mut a = vec![0u8; 160 * 144];
        let mut b = vec![2u8; 160 * 144];

        let kind = with_update_task(&pipeline, || {
            let mut first = indexed(&mut a);
            let mut second = indexed(&mut b);
            unsafe { pipeline.queue_update(&mut first, None) };
            pipeline.drain_frames();
            let kind = unsafe { pipeline.queue_update(&mut second, Some(&first)) };
            pipeline.drain_frames();
            assert_eq!(second.diff().lines()[0], LineDiff { left: 0, width: 160, repeat: 144 });
            kind
        });
        assert_eq!(kind, UpdateKind::Full);
    }

    #[test]
    fn test_every_row_changed_is_full() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let pipeline = DisplayPipeline::new(RecordingBus::new(), StdClock::new(), &pools, &lock);
        let mut a = vec![0u8; 160 * 144];
        let mut b = a.clone();
        for row in b.chunks_exact_mut(160) {
            row[80] = 3;
        }

        let (kind, first_line) = with_update_task(&pipeline, || {
            let mut first = indexed(&mut a);
            let mut second = indexed(&mut b);
            unsafe { pipeline.queue_update(&mut first, None) };
            pipeline.drain_frames();
            let kind = unsafe { pipeline.queue_update(&mut second, Some(&first)) };
            pipeline.drain_frames();
            (kind, second.diff().lines()[0])
        });

        assert_eq!(kind, UpdateKind::Full);
        assert!(first_line.width < 160);
        let stats = pipeline.stats().snapshot();
        assert_eq!((stats.frames_full, stats.last_lines_changed), (2, 144));
    }

    #[test]
    fn test_mode_change_forces_full_redraw() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let pipeline = DisplayPipeline::new(RecordingBus::new(), StdClock::new(), &pools, &lock);
        let mut a = vec![1u8; 160 * 144];
        let mut b = a.clone();

        let kind = with_update_task(&pipeline, || {
            let mut first = indexed(&mut a);
            let mut second = indexed(&mut b);
            unsafe { pipeline.queue_update(&mut first, None) };
            pipeline.drain_frames();
            pipeline.set_scale_mode(ScaleMode::Off);
            let kind = unsafe { pipeline.queue_update(&mut second, Some(&first)) };
            pipeline.drain_frames();
            kind
        });

        assert_eq!(kind, UpdateKind::Full);
        assert!(!pipeline.settings().refresh_pending());
        // Off centers the frame on a black screen.
        pipeline.panel().scheduler().bus().panel(|model| {
            assert_eq!(model.pixel(79, 48), colors::raw(colors::BLACK));
            assert_eq!(model.pixel(80, 48), PALETTE[1]);
            assert_eq!(model.pixel(239, 191), PALETTE[1]);
            assert_eq!(model.pixel(240, 191), colors::raw(colors::BLACK));
        });
    }

    #[test]
    fn test_clear_then_same_color_frame_has_no_changes() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let pipeline = DisplayPipeline::new(RecordingBus::new(), StdClock::new(), &pools, &lock);
        let blue = Rgb565::new(0, 0, 31);
        let solid = [colors::raw(blue); 4];
        let mut a = vec![0u8; 160 * 144];
        let mut b = vec![0u8; 160 * 144];

        let kind = with_update_task(&pipeline, || {
            pipeline.clear(blue).unwrap();
            let format = PixelFormat::Indexed { palette: &solid, mask: 0x03, shift_mask: 0 };
            let mut first = LogicalFrame::new(160, 144, 160, format, &mut a).unwrap();
            let mut second = LogicalFrame::new(160, 144, 160, format, &mut b).unwrap();
            unsafe { pipeline.queue_update(&mut first, None) };
            pipeline.drain_frames();
            let kind = unsafe { pipeline.queue_update(&mut second, Some(&first)) };
            pipeline.drain_frames();
            assert!(second.diff().lines()[..144].iter().all(|l| l.width == 0));
            kind
        });

        assert_eq!(kind, UpdateKind::Empty);
        pipeline.panel().scheduler().bus().panel(|model| {
            assert!((0..240).all(|y| model.row(y).iter().all(|&p| p == colors::raw(blue))));
        });
    }

    #[test]
    fn test_raw_write_reaches_screen() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let pipeline = DisplayPipeline::new(RecordingBus::new(), StdClock::new(), &pools, &lock);
        let pixels = [0x1234u16; 12];

        with_update_task(&pipeline, || pipeline.write(100, 100, 4, 3, &pixels).unwrap());

        assert_eq!(pipeline.panel().scheduler().in_flight(), 0);
        assert_eq!(lock.owner(), None);
        pipeline.panel().scheduler().bus().panel(|model| {
            assert_eq!(model.row(102)[100..104], [0x1234; 4]);
            assert_eq!(model.pixel(104, 102), 0);
        });
    }
}
