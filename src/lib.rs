//! # `wilc-sdio-hal`
//! This is an async driver for the SDIO register transport of Microchip WILC1000, WILC3000 and
//! WILCS02 chips. It sits between an SDIO host controller and the bus independent upper layers of
//! a WILC driver, which talk to the chip through [HostInterface].
//!
//! ## Hardware overview
//! This chapter will give a short overview of how the chip is reached over SDIO.
//!
//! ### Commands
//! The card only understands two commands. CMD52 reads or writes a single byte of a function's
//! register space, CMD53 streams a number of bytes or blocks. Function 0 holds the standard CCCR
//! and the function basic registers (FBR), function 1 is the chip itself. Both are built through
//! the checked constructors in [cmd].
//!
//! ### The CSA window
//! Chip memory and most chip registers aren't directly addressable, since CMD52 and CMD53 only
//! carry 17 address bits. Instead, a 24-bit address is written byte by byte to the CSA pointer in
//! the FBR of function 1, after which the function 0 data register at `0x10f` reads and writes the
//! chip memory at that address. We call this the CSA window. A window update, which failed part
//! way, leaves the window in an unknown state, so it's always re-armed before the next access.
//!
//! ### Variants
//! The WILC1000 and WILC3000 behave mostly the same, apart from where the interrupt flags and the
//! acknowledge registers live. The WILCS02 accesses most registers through function 1 directly,
//! doesn't stream with an incrementing address and has a latch, which has to be cleared after every
//! transfer. All of these differences are captured in a [regs::VariantRegisters] table, which is
//! selected once the chip was identified.
//!
//! ### Interrupts
//! Interrupts are either signalled in band, through the SDIO DAT1 line, or through a dedicated
//! GPIO. The host's interrupt dispatcher holds the host claim, while calling
//! [WilcSdio::service_interrupt], which gives up the claim, so the platform's handler can use the
//! bus. Releasing the interrupt waits for a running handler to finish, which is coordinated
//! through the [InterruptLock].

#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]
pub(crate) mod fmt;

mod bus;
pub mod cmd;
mod hif;
mod interrupt;
mod lifecycle;
pub mod regs;
mod sdio;
mod status;
mod sync;
mod transfer;

#[cfg(test)]
mod mock;

pub use bus::{HostClaim, HostError, SdioHost};
pub use hif::{HostInterface, Platform};
pub use lifecycle::Suspended;
pub use regs::ChipVariant;
pub use sdio::*;
pub use status::InterruptStatus;
pub use sync::{InterruptLock, IrqLockState};

cfg_if::cfg_if! {
    if #[cfg(feature = "critical_section")] {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    } else {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
    }
}
