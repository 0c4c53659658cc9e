//! Decoding and acknowledging of pending interrupts.

use bitfield_struct::bitfield;
use macro_bits::{bit, check_bit};

use crate::{
    bus::SdioHost,
    cmd::Cmd52,
    hif::Platform,
    regs::{
        AckScheme, ByteRegister, ChipVariant, F1_INTERRUPT_VALUE, INTR_ENABLE_FIRST_BIT,
        IRQ_FLAGS_MASK, MAX_NUM_INT, MISC_POWER_SEQUENCER, PIN_MUX_IRQ_SELECT,
        UNHANDLED_IRQ_MASK, WILCS02_SPI_SIZE_REG, WILC_INTR_ENABLE, WILC_MISC, WILC_PIN_MUX_0,
    },
    SdioError, SdioResult, WilcSdio,
};

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
/// Pending interrupt state of the chip.
pub struct InterruptStatus {
    /// Size of the pending payload in words.
    pub payload_words: u16,
    /// Pending interrupt flags.
    #[bits(5)]
    pub flags: u8,
    #[bits(11)]
    __reserved: u16,
}

/// The VMM table select and enable bits of an acknowledge mask, moved down to bit zero.
const fn vmm_bits(bitmask: u32) -> u32 {
    (bitmask >> 6) & 0b111
}

impl<H: SdioHost, P: Platform> WilcSdio<H, P> {
    async fn read_byte_register(&self, register: ByteRegister) -> SdioResult<u8> {
        self.issue_single_byte(Cmd52::read(register.function, register.address)?)
            .await
    }
    /// Write an acknowledge value to a function 0 register, unless there's nothing to
    /// acknowledge.
    async fn write_ack_register(&self, register: u32, value: u32) -> SdioResult<()> {
        if value == 0 {
            return Ok(());
        }
        self.issue_single_byte(Cmd52::write(0, register, value as u8)?)
            .await
            .map_err(|err| {
                error!("Failed to write {:#x} to ack register {:#x}.", value, register);
                err
            })?;
        Ok(())
    }
    /// Read the size of the pending payload in words.
    pub async fn read_transfer_size(&self) -> SdioResult<u16> {
        if self.config.alternate_transport && self.is_variant(ChipVariant::WilcS02) {
            return Ok(self.read_register(WILCS02_SPI_SIZE_REG).await? as u16);
        }
        let size_reg = self.registers().size_reg;
        let low = self.read_byte_register(size_reg).await?;
        let high = self
            .read_byte_register(ByteRegister {
                address: size_reg.address + 1,
                ..size_reg
            })
            .await?;
        Ok(u16::from_le_bytes([low, high]))
    }
    /// Read the payload size and the pending interrupt flags.
    pub async fn read_pending(&self) -> SdioResult<InterruptStatus> {
        let registers = self.registers();
        let status = InterruptStatus::new().with_payload_words(self.read_transfer_size().await?);
        if self.config.gpio_irq() {
            let Some(gpio_flags) = registers.gpio_flags else {
                return Ok(status);
            };
            let flags = self.read_byte_register(gpio_flags.register).await?;
            Ok(status.with_flags(flags & gpio_flags.mask))
        } else {
            let polled_flags = registers.polled_flags;
            let flags = self.read_byte_register(polled_flags.register).await?;
            if !polled_flags.packed {
                return Ok(status);
            }
            if check_bit!(flags, UNHANDLED_IRQ_MASK) {
                warn!(
                    "Unexpected interrupt flags: {:#x}",
                    (flags & UNHANDLED_IRQ_MASK) >> 5
                );
            }
            Ok(status.with_flags(flags & IRQ_FLAGS_MASK as u8))
        }
    }
    /// Clear the interrupts in `bitmask` and apply the VMM table selection in it.
    ///
    /// Interrupt bits are only written back in GPIO mode. Registers, for which nothing is left
    /// to write, aren't touched at all.
    pub async fn acknowledge(&self, bitmask: u32) -> SdioResult<()> {
        let irq_bits = if self.config.gpio_irq() {
            bitmask & IRQ_FLAGS_MASK
        } else {
            0
        };
        match self.registers().ack {
            AckScheme::Combined {
                register,
                vmm_shift,
            } => {
                self.write_ack_register(register, irq_bits | (vmm_bits(bitmask) << vmm_shift))
                    .await
            }
            AckScheme::Split {
                irq_register,
                vmm_register,
            } => {
                self.write_ack_register(irq_register, irq_bits).await?;
                self.write_ack_register(vmm_register, vmm_bits(bitmask))
                    .await
            }
            AckScheme::Latch { latch, interrupt } => {
                self.issue_single_byte(Cmd52::write_raw(1, latch, 1)?)
                    .await?;
                self.issue_single_byte(Cmd52::write(1, interrupt, F1_INTERRUPT_VALUE)?)
                    .await
                    .map(|_| ())
            }
        }
    }
    /// Route `nint` chip interrupts to the host.
    pub async fn sync_ext(&self, nint: u32) -> SdioResult<()> {
        if nint > MAX_NUM_INT {
            error!("Too many interrupts: {}", nint);
            return Err(SdioError::InvalidArgument);
        }
        if self.registers().disable_power_sequencer {
            trace!("Disabling power sequencer.");
            let misc = self.read_register(WILC_MISC).await?;
            self.write_register(WILC_MISC, misc & !MISC_POWER_SEQUENCER)
                .await?;
        }
        if self.config.gpio_irq() {
            trace!("Selecting interrupt pin mux.");
            let pin_mux = self.read_register(WILC_PIN_MUX_0).await?;
            self.write_register(WILC_PIN_MUX_0, pin_mux | PIN_MUX_IRQ_SELECT)
                .await?;

            let enable = (0..nint).fold(
                self.read_register(WILC_INTR_ENABLE).await?,
                |enable, i| enable | bit!(INTR_ENABLE_FIRST_BIT + i),
            );
            self.write_register(WILC_INTR_ENABLE, enable).await?;
        }
        Ok(())
    }
}
