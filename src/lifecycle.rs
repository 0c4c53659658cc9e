//! Bring up, identification, reset and power management of the card.

use embassy_sync::mutex::MutexGuard;
#[cfg(any(feature = "log", feature = "defmt"))]
use embassy_time::Instant;
use macro_bits::check_bit;
use portable_atomic::Ordering;

use crate::{
    bus::SdioHost,
    cmd::Cmd52,
    hif::Platform,
    regs::{
        sdio_fbr_base, CCCR_ABORT_RESET, CCCR_BUS_CONTROL_VALUE, CCCR_IEN_FUNC1, CCCR_IEN_MASTER,
        CCCR_IO_EN_FUNC1, F1_INTERRUPT_REG, F1_INTERRUPT_VALUE, FBR_ENABLE_CSA, SDIO_CCCR_ABORT,
        SDIO_CCCR_BUS_CONTROL, SDIO_CCCR_IENX, SDIO_CCCR_IOEX, SDIO_CCCR_IORX, WAKEUP_REG,
        WAKEUP_VALUE, WILCS02_CHIP_ID, WILC_CHIPID,
    },
    DefaultRawMutex, LifecycleState, SdioError, SdioResult, WilcSdio,
};

/// How often function 1 is polled for readiness during init.
const FUNCTION1_READY_ATTEMPTS: usize = 3;

/// A suspended session.
///
/// This holds the HIF lock until it's passed to [WilcSdio::resume], so no other sequence of
/// operations can run while the chip is suspended.
pub struct Suspended<'a> {
    _hif_guard: MutexGuard<'a, DefaultRawMutex, ()>,
    reset: SdioResult<()>,
}
impl Suspended<'_> {
    /// Result of the card reset issued on suspend entry.
    ///
    /// Suspending doesn't fail if the reset failed.
    pub fn reset_status(&self) -> SdioResult<()> {
        self.reset
    }
}

impl<H: SdioHost, P: Platform> WilcSdio<H, P> {
    /// Write a single byte and log a failure with `what`.
    async fn configure(&self, cmd: Cmd52, what: &'static str) -> SdioResult<u8> {
        self.issue_single_byte(cmd).await.map_err(|err| {
            error!("Failed to {}.", what);
            err
        })
    }
    async fn wait_function1_ready(&self) -> SdioResult<()> {
        for attempt in 1..=FUNCTION1_READY_ATTEMPTS {
            let ready = self
                .configure(Cmd52::read(0, SDIO_CCCR_IORX)?, "read IORx")
                .await?;
            if check_bit!(ready, CCCR_IO_EN_FUNC1) {
                return Ok(());
            }
            trace!("Function 1 not ready. Attempt: {}", attempt);
        }
        error!("Function 1 didn't become ready.");
        Err(SdioError::Sequence)
    }
    async fn enable_card_interrupts(&self) -> SdioResult<()> {
        const ENABLE: u8 = CCCR_IEN_MASTER | CCCR_IEN_FUNC1;
        let enabled = self
            .configure(Cmd52::read(0, SDIO_CCCR_IENX)?, "read IEN")
            .await?;
        if enabled & ENABLE != ENABLE {
            self.configure(
                Cmd52::write_raw(0, SDIO_CCCR_IENX, enabled | ENABLE)?,
                "set IEN",
            )
            .await?;
        }
        Ok(())
    }
    /// Configure both card functions.
    async fn configure_functions(&self) -> SdioResult<()> {
        let block_size = self.config.block_size();

        trace!("Enabling CSA.");
        self.configure(
            Cmd52::write_raw(0, sdio_fbr_base(1), FBR_ENABLE_CSA)?,
            "enable CSA",
        )
        .await?;
        self.set_block_size(0, block_size).await?;

        trace!("Enabling function 1.");
        self.configure(
            Cmd52::write_raw(0, SDIO_CCCR_IOEX, CCCR_IO_EN_FUNC1)?,
            "set IOEx",
        )
        .await?;
        self.wait_function1_ready().await?;
        self.set_block_size(1, block_size).await?;

        self.configure(
            Cmd52::write(0, SDIO_CCCR_BUS_CONTROL, CCCR_BUS_CONTROL_VALUE)?,
            "set bus width",
        )
        .await?;
        self.enable_card_interrupts().await?;
        self.configure(
            Cmd52::write(0, WAKEUP_REG, WAKEUP_VALUE)?,
            "set wakeup register",
        )
        .await?;
        self.configure(
            Cmd52::write(1, F1_INTERRUPT_REG, F1_INTERRUPT_VALUE)?,
            "set interrupt register",
        )
        .await?;
        Ok(())
    }
    /// Read the chip ID and set up the variant specific parts of the session.
    async fn identify(&self) -> SdioResult<()> {
        let mut chip_id = self.read_register(WILC_CHIPID).await?;
        let mut variant = self.platform.classify_chip(chip_id);
        if variant.is_none() {
            debug!("Chip ID {:#x} unknown, trying WILCS02 ID register.", chip_id);
            chip_id = self.read_register(WILCS02_CHIP_ID).await?;
            variant = self.platform.classify_chip(chip_id);
        }
        let Some(variant) = variant else {
            error!("Unsupported chip ID: {:#x}", chip_id);
            return Err(SdioError::Protocol);
        };
        info!("Chip ID: {:#x} Variant: {:?}", chip_id, variant);
        self.set_variant(variant);

        let registers = variant.registers();
        if let Some(vmm) = registers.vmm {
            trace!("Initializing VMM control registers.");
            self.write_register(vmm.host_vmm_tx_ctl, 0).await?;
            self.write_register(vmm.host_vmm_rx_ctl, 0).await?;
        }
        if registers.broken_byte_mode_512 {
            self.bus.lock().await.host.set_broken_byte_mode_512();
        }
        self.set_state(LifecycleState::Identified);
        Ok(())
    }
    async fn bring_up(&self, resume: bool) -> SdioResult<()> {
        self.configure_functions().await?;
        self.set_state(LifecycleState::FunctionsConfigured);
        if !resume {
            self.identify().await?;
        }
        Ok(())
    }
    fn release_pm(&self) {
        if self.pm_claimed.swap(false, Ordering::AcqRel) {
            self.platform.runtime_pm_put();
        }
    }
    /// Initialize the card.
    ///
    /// With `resume` set, the chip isn't identified again and the variant of the session is kept.
    pub async fn init(&self, resume: bool) -> SdioResult<()> {
        debug!(
            "Initializing SDIO. Resume: {} SPI: {}",
            resume, self.config.alternate_transport
        );
        #[cfg(any(feature = "log", feature = "defmt"))]
        let start_time = Instant::now();
        let mut pm_taken = false;
        if !resume && !self.config.alternate_transport && !self.pm_claimed.load(Ordering::Acquire)
        {
            self.platform.runtime_pm_get().map_err(|err| {
                error!("Failed to get runtime PM.");
                err
            })?;
            self.pm_claimed.store(true, Ordering::Release);
            pm_taken = true;
        }
        if let Err(err) = self.bring_up(resume).await {
            self.initialized.store(false, Ordering::Release);
            if pm_taken {
                self.release_pm();
            }
            return Err(err);
        }
        self.initialized.store(true, Ordering::Release);
        self.set_state(LifecycleState::Ready);
        #[cfg(any(feature = "log", feature = "defmt"))]
        trace!(
            "SDIO init complete. Took {} µs",
            start_time.elapsed().as_micros()
        );
        Ok(())
    }
    /// Shut the chip down.
    pub fn deinit(&self) {
        debug!("Deinitializing SDIO.");
        self.initialized.store(false, Ordering::Release);
        self.set_state(LifecycleState::Uninitialized);
        self.release_pm();
        self.platform.power(false);
        self.powered
            .store(self.config.power_sequenced, Ordering::Release);
    }
    /// Issue an abort reset to the card.
    pub async fn reset(&self) -> SdioResult<()> {
        info!("Resetting SDIO card.");
        self.configure(
            Cmd52::write(0, SDIO_CCCR_ABORT, CCCR_ABORT_RESET)?,
            "reset card",
        )
        .await?;
        Ok(())
    }
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
    pub fn clear_initialized(&self) {
        self.initialized.store(false, Ordering::Release);
    }
    /// Power the chip and initialize it, if that didn't happen yet.
    ///
    /// Unless power was sequenced by the platform already, the chip is power cycled once per
    /// session.
    pub async fn power_up(&self) -> SdioResult<()> {
        if !self.powered.swap(true, Ordering::AcqRel) {
            trace!("Power cycling chip.");
            self.platform.power(false);
            self.platform.power(true);
        }
        if !self.is_initialized() {
            self.init(false).await?;
        }
        Ok(())
    }
    /// Put the chip to sleep and reset the card.
    ///
    /// The returned token keeps the HIF lock held, until it's passed to [Self::resume].
    pub async fn suspend(&self) -> Suspended<'_> {
        info!("Suspending SDIO.");
        let hif_guard = self.hif_lock.lock().await;
        self.platform.chip_wakeup(self).await;
        drop(hif_guard);

        self.platform.host_sleep_notify(self).await;
        self.platform.chip_allow_sleep(self).await;

        let hif_guard = self.hif_lock.lock().await;
        let reset = self.reset().await;
        if let Err(err) = reset {
            warn!("Card reset on suspend failed: {:?}", err);
        }
        self.set_state(LifecycleState::Suspended);
        Suspended {
            _hif_guard: hif_guard,
            reset,
        }
    }
    /// Wake the chip up again and re-initialize the card.
    ///
    /// The chip isn't identified again. The sequence is completed even if the re-initialization
    /// failed, the error is returned afterwards.
    pub async fn resume(&self, suspended: Suspended<'_>) -> SdioResult<()> {
        info!("Resuming SDIO.");
        self.platform.chip_wakeup(self).await;
        let res = self.init(true).await;
        drop(suspended);

        self.platform.host_wakeup_notify(self).await;

        let hif_guard = self.hif_lock.lock().await;
        self.platform.chip_allow_sleep(self).await;
        drop(hif_guard);
        res
    }
}
