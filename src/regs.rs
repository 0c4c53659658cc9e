//! Register map of the SDIO card and the chip behind it.
//!
//! Function 0 addresses below `0x100` are the standard CCCR, the FBR of function `n` lives at
//! `n * 0x100`. Everything above that is reached through the CSA window.

use macro_bits::{bit, serializable_enum};

// CCCR
pub const SDIO_CCCR_IOEX: u32 = 0x02;
pub const SDIO_CCCR_IORX: u32 = 0x03;
pub const SDIO_CCCR_IENX: u32 = 0x04;
pub const SDIO_CCCR_ABORT: u32 = 0x06;
pub const SDIO_CCCR_BUS_CONTROL: u32 = 0x07;
pub const SDIO_CCCR_BLKSIZE: u32 = 0x10;

pub const CCCR_BUS_CONTROL_VALUE: u8 = 0xa2;
pub const CCCR_ABORT_RESET: u8 = bit!(3);
pub const CCCR_IO_EN_FUNC1: u8 = bit!(1);
pub const CCCR_IEN_MASTER: u8 = bit!(0);
pub const CCCR_IEN_FUNC1: u8 = bit!(1);

/// Base address of the function basic registers of `function`.
pub const fn sdio_fbr_base(function: u8) -> u32 {
    function as u32 * 0x100
}
pub const FBR_ENABLE_CSA: u8 = bit!(7);

// CSA window and data ports.
pub const FBR_CSA_REG: u32 = 0x10c;
pub const FBR_DATA_REG: u32 = 0x10f;
pub const F1_DATA_REG: u32 = 0x00;
/// Highest address the CSA window can point at.
pub const CSA_ADDRESS_MAX: u32 = 0xff_ffff;

pub const WAKEUP_REG: u32 = 0x1_8000;
pub const WAKEUP_VALUE: u8 = 1;
pub const F1_INTERRUPT_REG: u32 = 0x09;
pub const F1_INTERRUPT_VALUE: u8 = 1;

pub const INTERRUPT_DATA_SZ_REG: u32 = 0xf2;
pub const EXT_IRQ_FLAG_REG: u32 = 0x04;

/// Vendor specific function 0 registers, which are accessed byte wise.
pub const VENDOR_REGS: core::ops::RangeInclusive<u32> = 0xf0..=0xff;

// Chip identification.
pub const WILC_CHIPID: u32 = 0x1000;
pub const WILC3000_CHIP_ID: u32 = 0x3b_0000;
pub const WILCS02_CHIP_ID: u32 = 0x0f;

// Chip registers used while setting up interrupts.
pub const WILC_PIN_MUX_0: u32 = 0x1408;
pub const WILC_INTR_ENABLE: u32 = 0x1a00;
pub const WILC_MISC: u32 = 0x1428;
pub const PIN_MUX_IRQ_SELECT: u32 = bit!(8);
pub const MISC_POWER_SEQUENCER: u32 = bit!(8);
pub const INTR_ENABLE_FIRST_BIT: u32 = 27;

// Interrupt and VMM flags passed to the acknowledge path.
pub const MAX_NUM_INT: u32 = 5;
pub const IRQ_FLAGS_MASK: u32 = bit!(MAX_NUM_INT) - 1;
pub const DATA_INT_CLR: u32 = bit!(0);
pub const SEL_VMM_TBL0: u32 = bit!(6);
pub const SEL_VMM_TBL1: u32 = bit!(7);
pub const EN_VMM: u32 = bit!(8);
pub const ENABLE_RX_VMM: u32 = SEL_VMM_TBL1 | EN_VMM;
pub const ENABLE_TX_VMM: u32 = SEL_VMM_TBL0 | EN_VMM;
/// Flag bits of the extended IRQ register, which have no handler.
pub const UNHANDLED_IRQ_MASK: u8 = 0xe0;

/// Value written to the VMM TX control register after every transfer on the WILCS02.
pub const VMM_INT_CLR: u32 = 0x1;

pub const SDIO_BLOCK_SIZE: u16 = 512;
pub const SPI_BLOCK_SIZE: u16 = 256;

serializable_enum! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The chip family behind the SDIO card.
    pub enum ChipVariant: u8 {
        Wilc1000 => 1,
        Wilc3000 => 2,
        WilcS02 => 3
    }
}
impl ChipVariant {
    /// Match a value read from one of the chip ID registers against the known ID ranges.
    pub const fn from_chip_id(chip_id: u32) -> Option<Self> {
        match chip_id & 0xffff_f000 {
            0x10_0000 => Some(Self::Wilc1000),
            0x30_0000 => Some(Self::Wilc3000),
            0x50_0000 => Some(Self::WilcS02),
            _ => None,
        }
    }
    /// Inverse of `into_bits`, used for the atomic variant tag of a session.
    pub(crate) const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Wilc1000),
            2 => Some(Self::Wilc3000),
            3 => Some(Self::WilcS02),
            _ => None,
        }
    }
    /// The register table of this variant.
    pub fn registers(&self) -> &'static VariantRegisters {
        match self {
            Self::Wilc3000 => &WILC3000_REGISTERS,
            Self::WilcS02 => &WILCS02_REGISTERS,
            _ => &WILC1000_REGISTERS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A single byte register on one of the card functions.
pub struct ByteRegister {
    pub function: u8,
    pub address: u32,
}
impl ByteRegister {
    pub const fn f0(address: u32) -> Self {
        Self {
            function: 0,
            address,
        }
    }
    pub const fn f1(address: u32) -> Self {
        Self {
            function: 1,
            address,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Flag register read in GPIO interrupt mode.
pub struct GpioFlagRegister {
    pub register: ByteRegister,
    pub mask: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Flag register read in in-band interrupt mode.
pub struct PolledFlagRegister {
    pub register: ByteRegister,
    /// Whether the value is packed into the status word.
    ///
    /// Otherwise the read only clears the latch.
    pub packed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// How interrupts and VMM selections get acknowledged.
pub enum AckScheme {
    /// IRQ bits and VMM bits share one register, the VMM bits start at `vmm_shift`.
    Combined { register: u32, vmm_shift: u32 },
    /// IRQ bits and VMM bits go to separate registers, the VMM bits start at bit zero.
    Split { irq_register: u32, vmm_register: u32 },
    /// A raw write to `latch` followed by a write to `interrupt`, both on function 1.
    Latch { latch: u32, interrupt: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// How 32-bit registers outside the vendor range are reached.
pub enum RegisterPath {
    /// CSA window plus the function 0 data register.
    Windowed,
    /// Function 1 addressed directly, except for `windowed_reads`, which go through the CSA
    /// window in non incrementing mode.
    Function1 {
        windowed_reads: core::ops::RangeInclusive<u32>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Addresses of the VMM control registers.
pub struct VmmControl {
    pub host_vmm_tx_ctl: u32,
    pub host_vmm_rx_ctl: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Everything, that differs in the register layout of the supported chips.
pub struct VariantRegisters {
    /// Low byte of the payload size, the high byte follows directly after it.
    pub size_reg: ByteRegister,
    pub gpio_flags: Option<GpioFlagRegister>,
    pub polled_flags: PolledFlagRegister,
    pub ack: AckScheme,
    /// Whether bulk transfers use incrementing addresses.
    pub stream_increment: bool,
    pub register_path: RegisterPath,
    pub vmm: Option<VmmControl>,
    pub disable_power_sequencer: bool,
    /// The host must not use byte mode for transfers of 512 bytes.
    pub broken_byte_mode_512: bool,
}

pub static WILC1000_REGISTERS: VariantRegisters = VariantRegisters {
    size_reg: ByteRegister::f0(INTERRUPT_DATA_SZ_REG),
    gpio_flags: Some(GpioFlagRegister {
        register: ByteRegister::f0(0xf7),
        mask: 0x1f,
    }),
    polled_flags: PolledFlagRegister {
        register: ByteRegister::f1(EXT_IRQ_FLAG_REG),
        packed: true,
    },
    ack: AckScheme::Combined {
        register: 0xf8,
        vmm_shift: 5,
    },
    stream_increment: true,
    register_path: RegisterPath::Windowed,
    vmm: None,
    disable_power_sequencer: false,
    broken_byte_mode_512: false,
};
pub static WILC3000_REGISTERS: VariantRegisters = VariantRegisters {
    size_reg: ByteRegister::f0(INTERRUPT_DATA_SZ_REG),
    gpio_flags: Some(GpioFlagRegister {
        register: ByteRegister::f0(0xfe),
        mask: 0x0f,
    }),
    polled_flags: PolledFlagRegister {
        register: ByteRegister::f1(EXT_IRQ_FLAG_REG),
        packed: true,
    },
    ack: AckScheme::Split {
        irq_register: 0xfe,
        vmm_register: 0xf6,
    },
    stream_increment: true,
    register_path: RegisterPath::Windowed,
    vmm: None,
    disable_power_sequencer: true,
    broken_byte_mode_512: false,
};
pub static WILCS02_REGISTERS: VariantRegisters = VariantRegisters {
    size_reg: ByteRegister::f1(0x0c),
    gpio_flags: None,
    polled_flags: PolledFlagRegister {
        register: ByteRegister::f1(0x08),
        packed: false,
    },
    ack: AckScheme::Latch {
        latch: 0x08,
        interrupt: F1_INTERRUPT_REG,
    },
    stream_increment: false,
    register_path: RegisterPath::Function1 {
        windowed_reads: 0x01..=0x0f,
    },
    vmm: Some(VmmControl {
        host_vmm_tx_ctl: 0x10,
        host_vmm_rx_ctl: 0x14,
    }),
    disable_power_sequencer: false,
    broken_byte_mode_512: true,
};
/// Register used by the WILCS02 for the payload size, when the card is driven over SPI.
pub const WILCS02_SPI_SIZE_REG: u32 = 0x07;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_id_ranges() {
        assert_eq!(
            ChipVariant::from_chip_id(0x0010_03a0),
            Some(ChipVariant::Wilc1000)
        );
        assert_eq!(
            ChipVariant::from_chip_id(0x0030_01a0),
            Some(ChipVariant::Wilc3000)
        );
        assert_eq!(
            ChipVariant::from_chip_id(0x0050_0000),
            Some(ChipVariant::WilcS02)
        );
        assert_eq!(ChipVariant::from_chip_id(0x0020_0000), None);
        assert_eq!(ChipVariant::from_chip_id(0), None);
    }
    #[test]
    fn variant_tag() {
        for variant in [
            ChipVariant::Wilc1000,
            ChipVariant::Wilc3000,
            ChipVariant::WilcS02,
        ] {
            assert_eq!(ChipVariant::from_tag(variant.into_bits()), Some(variant));
        }
        assert_eq!(ChipVariant::from_tag(0), None);
    }
    #[test]
    fn fbr_layout() {
        assert_eq!(sdio_fbr_base(1), 0x100);
        assert_eq!(sdio_fbr_base(0) + SDIO_CCCR_BLKSIZE, 0x10);
        assert_eq!(FBR_CSA_REG + 3, FBR_DATA_REG);
    }
}
