//! Firmware side of the bus scheduler.
//!
//! [`ChannelBus`] pushes transfers into a static channel sized to the
//! transaction pool, so `queue` never finds it full while the pool is
//! honest. [`bus_driver_task`] runs on a high-priority interrupt executor,
//! drains the channel through the ST7789 link and reports every transfer
//! back to the pipeline, which is what frees pool slots and releases the
//! bus lock.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::Instant;
use retro_display::config::TRANSACTION_COUNT;
use retro_display::{Bus, BusError, Clock, DisplayPipeline, Transfer};

use crate::st7789::St7789;

/// Pipeline as wired on the device.
pub type FirmwarePipeline = DisplayPipeline<'static, ChannelBus, EmbassyClock>;

/// Transfers waiting for the driver task, in queue order.
static TRANSFERS: Channel<CriticalSectionRawMutex, Transfer<'static>, TRANSACTION_COUNT> = Channel::new();

/// Handle to the transfer channel.
pub struct ChannelBus;

impl Bus<'static> for ChannelBus {
    fn queue(
        &self,
        transfer: Transfer<'static>,
    ) -> Result<(), BusError> {
        TRANSFERS.try_send(transfer).map_err(|_| BusError::QueueFull)
    }
}

/// `embassy_time` backed clock. Polls spin; both cores busy-wait here.
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 { Instant::now().as_millis() }
}

/// Bus driver: runs queued transfers in order and completes them.
#[embassy_executor::task]
pub async fn bus_driver_task(
    mut panel: St7789<'static>,
    pipeline: &'static FirmwarePipeline,
) {
    log_info!("bus driver started");
    loop {
        let transfer = TRANSFERS.receive().await;
        let moved = panel.transfer(&transfer).await;
        if let Err(e) = pipeline.complete(transfer.id, moved) {
            defmt::panic!("transfer {} failed: {}", transfer.id, e);
        }
    }
}
