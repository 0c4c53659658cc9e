//! Claiming, servicing and releasing the card interrupt.

use crate::{
    bus::{HostClaim, SdioHost},
    hif::Platform,
    regs::{ChipVariant, DATA_INT_CLR, ENABLE_RX_VMM},
    SdioError, SdioResult, WilcSdio,
};

impl<H: SdioHost, P: Platform> WilcSdio<H, P> {
    /// Register the card interrupt with the host.
    pub async fn enable_interrupt(&self) -> SdioResult<()> {
        self.irq_lock.reset();
        if self.is_variant(ChipVariant::WilcS02) {
            self.acknowledge(DATA_INT_CLR | ENABLE_RX_VMM).await?;
        }
        let res = self.bus.lock().await.host.claim_irq().await;
        res.map_err(|_| {
            error!("Failed to claim the SDIO interrupt.");
            SdioError::Resource
        })
    }
    /// Unregister the card interrupt.
    ///
    /// If an interrupt is being serviced, this waits for it to finish. Interrupts arriving after
    /// this was called are dropped.
    pub async fn disable_interrupt(&self) -> SdioResult<()> {
        debug!("Disabling SDIO interrupt.");
        self.irq_lock.begin_teardown().await;
        let res = self.bus.lock().await.host.release_irq().await;
        self.irq_lock.end_teardown();
        res.map_err(|_| {
            error!("Failed to release the SDIO interrupt.");
            SdioError::Resource
        })
    }
    /// Service a card interrupt.
    ///
    /// This is called by the host's interrupt dispatcher, which holds the host claim. The claim
    /// is given up while the interrupt is serviced, so the handler can use the bus, and is
    /// returned once it's done.
    pub async fn service_interrupt<'a>(&'a self, claim: HostClaim<'a, H>) -> HostClaim<'a, H> {
        if !self.irq_lock.try_begin_delivery() {
            trace!("Dropping interrupt, since the lock is {:?}.", self.irq_lock.state());
            return claim;
        }
        drop(claim);
        self.platform.handle_isr(self).await;
        let claim = self.claim_host().await;
        self.irq_lock.end_delivery();
        claim
    }
    pub fn irq_lock_state(&self) -> crate::IrqLockState {
        self.irq_lock.state()
    }
}
