//! Update Task: the single consumer of queued frames.
//!
//! Runs on its own core or thread. For each frame it either rebuilds the
//! geometry and redraws everything (first frame, settings change, new frame
//! size) or writes the frame's dirty blocks, then releases the mailbox so
//! the producer can queue the next one.

use crate::clock::Clock;
use crate::colors;
use crate::error::PipelineError;
use crate::frame::LogicalFrame;
use crate::pipeline::{DisplayPipeline, Message};
use crate::scheduler::Bus;
use crate::writer::{self, RectWriter};

pub struct UpdateTask<'p, 'a, B, C> {
    pipeline: &'p DisplayPipeline<'a, B, C>,
    writer: RectWriter,
    /// Logical size the current geometry was built for.
    frame_size: Option<(u16, u16)>,
}

impl<'p, 'a, B, C> UpdateTask<'p, 'a, B, C>
where
    B: Bus<'a>,
    C: Clock,
{
    pub fn new(pipeline: &'p DisplayPipeline<'a, B, C>) -> Self {
        Self {
            pipeline,
            writer: RectWriter::new(pipeline.panel().screen()),
            frame_size: None,
        }
    }

    /// Handle frames until the pipeline is shut down.
    pub fn run(&mut self) -> Result<(), PipelineError> {
        log_info!("update task started");
        while self.step()? {}
        log_info!("update task stopped");
        Ok(())
    }

    /// Wait for one message and handle it. Returns `false` on shutdown.
    pub fn step(&mut self) -> Result<bool, PipelineError> {
        let pipeline = self.pipeline;
        let frame = match pipeline.mailbox().wait_peek(pipeline.clock()) {
            Message::Frame(frame) => frame,
            Message::Shutdown => {
                pipeline.mailbox().consume();
                return Ok(false);
            }
        };
        // SAFETY: `queue_update` callers keep the frame alive and untouched
        // until the mailbox slot is consumed below.
        let frame = unsafe { frame.as_ref() };

        let settings = pipeline.settings();
        let epoch = settings.refresh_epoch();
        let size = (frame.width(), frame.height());

        if settings.refresh_pending() || self.frame_size != Some(size) {
            self.redraw(frame)?;
            settings.complete_refresh(epoch);
        } else {
            self.writer.write_frame(pipeline.panel(), frame)?;
        }

        pipeline.stats().record_drawn(self.writer.take_buffer_waits());
        pipeline.mailbox().consume();
        Ok(true)
    }

    /// Rebuild geometry for `frame`, blank the screen and draw it whole.
    fn redraw(
        &mut self,
        frame: &LogicalFrame<'_>,
    ) -> Result<(), PipelineError> {
        let pipeline = self.pipeline;
        let settings = pipeline.settings();
        let (width, height) = (frame.width(), frame.height());

        self.writer.configure(width, height, settings.policy_for(width, height), settings.filter_mode());
        pipeline.line_caps().publish(self.writer.geometry());
        self.frame_size = Some((width, height));

        pipeline.panel().invalidate_window();
        writer::fill_screen(pipeline.panel(), colors::BLACK)?;
        self.writer.write_full(pipeline.panel(), frame)
    }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus_lock::BusLock;
    use crate::frame::PixelFormat;
    use crate::pipeline::DmaPools;
    use crate::testing::{RecordingBus, StdClock, with_completions};

    #[test]
    fn test_shutdown_stops_loop() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let pipeline = DisplayPipeline::new(RecordingBus::new(), StdClock::new(), &pools, &lock);
        pipeline.shutdown();

        let mut task = UpdateTask::new(&pipeline);
        assert_eq!(task.step(), Ok(false));
        assert!(pipeline.mailbox().is_empty());
    }

    #[test]
    fn test_new_frame_size_rebuilds_geometry() {
        let pools = DmaPools::new();
        let lock = BusLock::new();
        let pipeline = DisplayPipeline::new(RecordingBus::new(), StdClock::new(), &pools, &lock);
        let palette = [0u16; 256];
        let format = PixelFormat::Indexed { palette: &palette, mask: 0xFF, shift_mask: 0 };
        let mut small = vec![0u8; 160 * 144];
        let mut large = vec![0u8; 256 * 224];

        let mut task = UpdateTask::new(&pipeline);
        with_completions(
            pipeline.panel().scheduler().bus(),
            |id, len| pipeline.complete(id, len).unwrap(),
            || {
                let mut frame = LogicalFrame::new(160, 144, 160, format, &mut small).unwrap();
                unsafe { pipeline.queue_update(&mut frame, None) };
                assert_eq!(task.step(), Ok(true));
                assert_eq!(task.writer.geometry().frame_size(), (160, 144));
                assert_eq!(task.writer.geometry().increments(), (160, 144));

                let mut frame = LogicalFrame::new(256, 224, 256, format, &mut large).unwrap();
                let previous = LogicalFrame::new(160, 144, 160, format, &mut small).unwrap();
                unsafe { pipeline.queue_update(&mut frame, Some(&previous)) };
                assert_eq!(task.step(), Ok(true));
                assert_eq!(task.writer.geometry().frame_size(), (256, 224));
                assert_eq!(task.writer.geometry().increments(), (256, 224));
                pipeline.drain().unwrap();
            },
        );
        assert_eq!(pipeline.stats().snapshot().frames_drawn, 2);
    }
}
