//! Argument words of the two SDIO I/O commands.
//!
//! CMD52 (IO_RW_DIRECT) moves a single byte, CMD53 (IO_RW_EXTENDED) streams a number of bytes or
//! blocks. Both are 32-bit words, which are built through the checked constructors below, so an
//! out of range function, address or count is rejected instead of being truncated into
//! neighbouring fields.

use bitfield_struct::bitfield;

use crate::{SdioError, SdioResult};

/// Highest function number addressable by both commands.
pub const MAX_FUNCTION: u8 = 7;
/// Highest register address addressable by both commands.
pub const MAX_ADDRESS: u32 = 0x1_ffff;
/// Highest count, that fits into a CMD53.
pub const MAX_COUNT: u16 = 0x1ff;
/// Size of the scratch buffer used for register sized transfers.
pub const SCRATCH_LEN: usize = 4;

fn check_target(function: u8, address: u32) -> SdioResult<()> {
    if function > MAX_FUNCTION || address > MAX_ADDRESS {
        error!(
            "Command target out of range. Function: {} Address: {:#x}",
            function, address
        );
        return Err(SdioError::InvalidArgument);
    }
    Ok(())
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
/// CMD52 argument.
pub struct Cmd52 {
    pub data: u8,
    #[bits(1)]
    __stuff0: u8,
    #[bits(17)]
    pub address: u32,
    #[bits(1)]
    __stuff1: u8,
    /// Read after write.
    pub raw: bool,
    #[bits(3)]
    pub function: u8,
    pub is_write: bool,
}
impl Cmd52 {
    fn checked(function: u8, address: u32) -> SdioResult<Self> {
        check_target(function, address)?;
        Ok(Self::new().with_function(function).with_address(address))
    }
    /// Read the byte at `address` of `function`.
    pub fn read(function: u8, address: u32) -> SdioResult<Self> {
        Self::checked(function, address)
    }
    /// Write `data` to `address` of `function`.
    pub fn write(function: u8, address: u32, data: u8) -> SdioResult<Self> {
        Ok(Self::checked(function, address)?
            .with_is_write(true)
            .with_data(data))
    }
    /// Write `data` to `address` of `function` and read the register back afterwards.
    pub fn write_raw(function: u8, address: u32, data: u8) -> SdioResult<Self> {
        Ok(Self::write(function, address, data)?.with_raw(true))
    }
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
/// CMD53 argument.
pub struct Cmd53 {
    /// Number of bytes or blocks.
    #[bits(9)]
    pub count: u16,
    #[bits(17)]
    pub address: u32,
    /// Incrementing address (OP code).
    pub increment: bool,
    pub block_mode: bool,
    #[bits(3)]
    pub function: u8,
    pub is_write: bool,
}
impl Cmd53 {
    fn checked(
        is_write: bool,
        function: u8,
        address: u32,
        block_mode: bool,
        increment: bool,
        count: u16,
    ) -> SdioResult<Self> {
        check_target(function, address)?;
        if count == 0 || count > MAX_COUNT {
            error!("CMD53 count {} out of range.", count);
            return Err(SdioError::InvalidArgument);
        }
        Ok(Self::new()
            .with_is_write(is_write)
            .with_function(function)
            .with_address(address)
            .with_block_mode(block_mode)
            .with_increment(increment)
            .with_count(count))
    }
    /// Read `count` bytes, or blocks if `block_mode` is set.
    pub fn read(
        function: u8,
        address: u32,
        block_mode: bool,
        increment: bool,
        count: u16,
    ) -> SdioResult<Self> {
        Self::checked(false, function, address, block_mode, increment, count)
    }
    /// Write `count` bytes, or blocks if `block_mode` is set.
    pub fn write(
        function: u8,
        address: u32,
        block_mode: bool,
        increment: bool,
        count: u16,
    ) -> SdioResult<Self> {
        Self::checked(true, function, address, block_mode, increment, count)
    }
    /// The amount of bytes moved by this command with the given block size.
    pub const fn byte_count(&self, block_size: u16) -> usize {
        if self.block_mode() {
            self.count() as usize * block_size as usize
        } else {
            self.count() as usize
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A CMD53 together with the parameters the host needs to execute it.
pub struct BlockRequest {
    pub cmd: Cmd53,
    /// Block size programmed into the host before the transfer.
    pub block_size: u16,
    /// Bounce the payload through the session's scratch buffer.
    ///
    /// Only valid for transfers of at most [SCRATCH_LEN] bytes.
    pub use_scratch: bool,
}
impl BlockRequest {
    pub const fn new(cmd: Cmd53, block_size: u16) -> Self {
        Self {
            cmd,
            block_size,
            use_scratch: false,
        }
    }
    pub const fn with_scratch(mut self) -> Self {
        self.use_scratch = true;
        self
    }
    pub const fn byte_count(&self) -> usize {
        self.cmd.byte_count(self.block_size)
    }
}
