use embassy_sync::mutex::{Mutex, MutexGuard};
use macro_bits::serializable_enum;
use portable_atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use crate::{
    bus::{BusCore, SdioHost},
    hif::Platform,
    regs::{ChipVariant, VariantRegisters, SDIO_BLOCK_SIZE, SPI_BLOCK_SIZE, WILC1000_REGISTERS},
    sync::InterruptLock,
    DefaultRawMutex,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdioError {
    /// A bus primitive failed.
    Transport,
    InvalidArgument,
    /// The chip ID didn't match any supported chip.
    Protocol,
    /// Function 1 didn't become ready.
    Sequence,
    /// The interrupt couldn't be claimed or released.
    Resource,
}
pub type SdioResult<T> = Result<T, SdioError>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// How the chip signals interrupts to the host.
pub enum IrqMode {
    /// Through the SDIO DAT1 line.
    #[default]
    InBand,
    /// Through a dedicated GPIO.
    Gpio,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
/// Parameters of a session, that are fixed at attach time.
pub struct SdioConfig {
    /// The card is driven through an SPI host (mmc-spi).
    ///
    /// This implies a smaller block size and no runtime PM claims.
    pub alternate_transport: bool,
    pub irq_mode: IrqMode,
    /// Power was already sequenced by the platform, so [WilcSdio::power_up] doesn't cycle it.
    pub power_sequenced: bool,
}
impl SdioConfig {
    /// The block size negotiated for both functions.
    pub const fn block_size(&self) -> u16 {
        if self.alternate_transport {
            SPI_BLOCK_SIZE
        } else {
            SDIO_BLOCK_SIZE
        }
    }
    pub const fn gpio_irq(&self) -> bool {
        matches!(self.irq_mode, IrqMode::Gpio)
    }
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// Where a session is in its lifecycle.
    pub enum LifecycleState: u8 {
        #[default]
        Uninitialized => 0,
        FunctionsConfigured => 1,
        Identified => 2,
        Ready => 3,
        Suspended => 4
    }
}
impl LifecycleState {
    const fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Self::FunctionsConfigured,
            2 => Self::Identified,
            3 => Self::Ready,
            4 => Self::Suspended,
            _ => Self::Uninitialized,
        }
    }
}

/// Driver for a WILC chip attached over SDIO.
///
/// All bus traffic goes through the bus lock, which also holds the scratch buffer and the
/// tracked CSA window. The HIF lock is only used to serialize sequences of operations, the driver
/// itself takes it during suspend and resume.
pub struct WilcSdio<H: SdioHost, P: Platform> {
    pub(crate) bus: Mutex<DefaultRawMutex, BusCore<H>>,
    pub(crate) hif_lock: Mutex<DefaultRawMutex, ()>,
    pub(crate) platform: P,
    pub(crate) config: SdioConfig,
    pub(crate) block_sizes: [AtomicU16; 2],
    pub(crate) variant: AtomicU8,
    pub(crate) state: AtomicU8,
    pub(crate) initialized: AtomicBool,
    pub(crate) pm_claimed: AtomicBool,
    pub(crate) powered: AtomicBool,
    pub(crate) irq_lock: InterruptLock,
}
impl<H: SdioHost, P: Platform> WilcSdio<H, P> {
    /// Create a new session.
    ///
    /// No bus traffic happens until [Self::power_up] or [Self::init] is called.
    pub fn new(host: H, platform: P, config: SdioConfig) -> Self {
        trace!(
            "Creating SDIO session. Block size: {} GPIO IRQ: {}",
            config.block_size(),
            config.gpio_irq()
        );
        Self {
            bus: Mutex::new(BusCore::new(host)),
            hif_lock: Mutex::new(()),
            platform,
            config,
            block_sizes: [
                AtomicU16::new(config.block_size()),
                AtomicU16::new(config.block_size()),
            ],
            variant: AtomicU8::new(0),
            state: AtomicU8::new(LifecycleState::Uninitialized.into_bits()),
            initialized: AtomicBool::new(false),
            pm_claimed: AtomicBool::new(false),
            powered: AtomicBool::new(config.power_sequenced),
            irq_lock: InterruptLock::new(),
        }
    }
    /// Tear down the session and return the host and platform.
    pub fn into_parts(self) -> (H, P) {
        trace!("Releasing SDIO session.");
        (self.bus.into_inner().host, self.platform)
    }
    pub fn config(&self) -> &SdioConfig {
        &self.config
    }
    pub fn platform(&self) -> &P {
        &self.platform
    }
    /// The chip variant, if the chip was identified already.
    pub fn variant(&self) -> Option<ChipVariant> {
        ChipVariant::from_tag(self.variant.load(Ordering::Acquire))
    }
    pub(crate) fn set_variant(&self, variant: ChipVariant) {
        self.variant.store(variant.into_bits(), Ordering::Release);
    }
    /// Register table of the identified chip.
    ///
    /// Before identification this is the WILC1000 table, which is also what the chip ID reads
    /// use.
    pub fn registers(&self) -> &'static VariantRegisters {
        match self.variant() {
            Some(variant) => variant.registers(),
            None => &WILC1000_REGISTERS,
        }
    }
    pub(crate) fn is_variant(&self, variant: ChipVariant) -> bool {
        self.variant() == Some(variant)
    }
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_tag(self.state.load(Ordering::Acquire))
    }
    pub(crate) fn set_state(&self, state: LifecycleState) {
        trace!("Lifecycle state: {:?}", state);
        self.state.store(state.into_bits(), Ordering::Release);
    }
    /// The block size last negotiated for `function`.
    pub fn block_size(&self, function: u8) -> u16 {
        match self.block_sizes.get(function as usize) {
            Some(block_size) => block_size.load(Ordering::Relaxed),
            None => self.config.block_size(),
        }
    }
    /// Acquire the HIF lock, which serializes sequences of operations against suspend and
    /// resume.
    pub async fn lock_hif(&self) -> MutexGuard<'_, DefaultRawMutex, ()> {
        self.hif_lock.lock().await
    }
}
