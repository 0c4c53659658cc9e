//! The interfaces between the transport and the rest of the driver.
//!
//! [HostInterface] is what the upper layers of the driver use to talk to the chip, independent of
//! the bus. [Platform] is what the transport needs from the board and the upper layers.

use crate::{
    bus::SdioHost, regs::ChipVariant, status::InterruptStatus, SdioResult, WilcSdio,
};

/// Bus independent operations on the chip.
pub trait HostInterface {
    /// Bring up the card. With `resume` set, the chip isn't identified again.
    async fn hif_init(&self, resume: bool) -> SdioResult<()>;
    async fn hif_deinit(&self) -> SdioResult<()>;
    async fn hif_reset(&self) -> SdioResult<()>;
    fn hif_is_init(&self) -> bool;
    fn hif_clear_init(&self);
    async fn hif_read_reg(&self, address: u32) -> SdioResult<u32>;
    async fn hif_write_reg(&self, address: u32, value: u32) -> SdioResult<()>;
    async fn hif_block_rx(&self, address: u32, buf: &mut [u8], size: usize) -> SdioResult<()>;
    async fn hif_block_tx(&self, address: u32, buf: &[u8], size: usize) -> SdioResult<()>;
    /// Same as [Self::hif_block_rx].
    async fn hif_block_rx_ext(&self, address: u32, buf: &mut [u8], size: usize) -> SdioResult<()> {
        self.hif_block_rx(address, buf, size).await
    }
    /// Same as [Self::hif_block_tx].
    async fn hif_block_tx_ext(&self, address: u32, buf: &[u8], size: usize) -> SdioResult<()> {
        self.hif_block_tx(address, buf, size).await
    }
    async fn hif_read_int(&self) -> SdioResult<InterruptStatus>;
    async fn hif_clear_int_ext(&self, bitmask: u32) -> SdioResult<()>;
    async fn hif_read_size(&self) -> SdioResult<u16>;
    async fn hif_sync_ext(&self, nint: u32) -> SdioResult<()>;
    async fn hif_enable_interrupt(&self) -> SdioResult<()>;
    async fn hif_disable_interrupt(&self) -> SdioResult<()>;
}

/// Hooks provided by the board and the upper layers of the driver.
///
/// The chip hooks get access to the bus through `hif`, they must not take the HIF lock of the
/// session.
pub trait Platform {
    /// Switch the chip's power on or off.
    fn power(&self, on: bool);
    /// Keep the host controller from runtime suspending.
    fn runtime_pm_get(&self) -> SdioResult<()> {
        Ok(())
    }
    fn runtime_pm_put(&self) {}
    /// Wake the chip up from sleep.
    async fn chip_wakeup<B: HostInterface>(&self, hif: &B);
    /// Allow the chip to go to sleep again.
    async fn chip_allow_sleep<B: HostInterface>(&self, hif: &B);
    /// Tell the chip, that the host is about to sleep.
    async fn host_sleep_notify<B: HostInterface>(&self, hif: &B);
    /// Tell the chip, that the host woke up.
    async fn host_wakeup_notify<B: HostInterface>(&self, hif: &B);
    /// Service a chip interrupt.
    async fn handle_isr<B: HostInterface>(&self, hif: &B);
    /// Map a value read from a chip ID register to a chip variant.
    fn classify_chip(&self, chip_id: u32) -> Option<ChipVariant> {
        ChipVariant::from_chip_id(chip_id)
    }
}

impl<H: SdioHost, P: Platform> HostInterface for WilcSdio<H, P> {
    async fn hif_init(&self, resume: bool) -> SdioResult<()> {
        self.init(resume).await
    }
    async fn hif_deinit(&self) -> SdioResult<()> {
        self.deinit();
        Ok(())
    }
    async fn hif_reset(&self) -> SdioResult<()> {
        self.reset().await
    }
    fn hif_is_init(&self) -> bool {
        self.is_initialized()
    }
    fn hif_clear_init(&self) {
        self.clear_initialized()
    }
    async fn hif_read_reg(&self, address: u32) -> SdioResult<u32> {
        self.read_register(address).await
    }
    async fn hif_write_reg(&self, address: u32, value: u32) -> SdioResult<()> {
        self.write_register(address, value).await
    }
    async fn hif_block_rx(&self, address: u32, buf: &mut [u8], size: usize) -> SdioResult<()> {
        self.read(address, buf, size).await
    }
    async fn hif_block_tx(&self, address: u32, buf: &[u8], size: usize) -> SdioResult<()> {
        self.write(address, buf, size).await
    }
    async fn hif_read_int(&self) -> SdioResult<InterruptStatus> {
        self.read_pending().await
    }
    async fn hif_clear_int_ext(&self, bitmask: u32) -> SdioResult<()> {
        self.acknowledge(bitmask).await
    }
    async fn hif_read_size(&self) -> SdioResult<u16> {
        self.read_transfer_size().await
    }
    async fn hif_sync_ext(&self, nint: u32) -> SdioResult<()> {
        self.sync_ext(nint).await
    }
    async fn hif_enable_interrupt(&self) -> SdioResult<()> {
        self.enable_interrupt().await
    }
    async fn hif_disable_interrupt(&self) -> SdioResult<()> {
        self.disable_interrupt().await
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::mock::test_session;

    #[test]
    fn extended_block_aliases() {
        let (sdio, chip) = test_session(Default::default());
        let data: [u8; 12] = core::array::from_fn(|i| i as u8 + 1);
        block_on(sdio.hif_block_tx_ext(0x3000, &data, 10)).unwrap();
        assert_eq!(chip.borrow().peek(0x3000), 0x0403_0201);

        let mut buf = [0u8; 12];
        block_on(sdio.hif_block_rx_ext(0x3000, &mut buf, 10)).unwrap();
        assert_eq!(&buf[..10], &data[..10]);
        assert_eq!(&buf[10..], &[0, 0]);

        block_on(sdio.hif_block_tx_ext(0, &data, 12)).unwrap();
        assert_eq!(chip.borrow().fifo_written(), &data);
    }
}
