//! Bulk transfers and 32-bit register access.

use crate::{
    bus::SdioHost,
    cmd::{BlockRequest, Cmd52, Cmd53, SCRATCH_LEN},
    hif::Platform,
    regs::{
        RegisterPath, F1_DATA_REG, FBR_DATA_REG, VENDOR_REGS, VMM_INT_CLR, WILC3000_CHIP_ID,
        WILCS02_CHIP_ID, WILC_CHIPID,
    },
    SdioError, SdioResult, WilcSdio,
};

/// Where the payload of a bulk transfer goes.
struct DataPort {
    function: u8,
    register: u32,
    /// The CSA window has to be pointed at the target, before every chunk.
    windowed: bool,
    increment: bool,
    block_size: u16,
}

/// Split `size` bytes into a block mode and a byte mode part.
///
/// Yields `(block_mode, count, bytes)` for every non empty part.
fn chunks(size: usize, block_size: u16) -> impl Iterator<Item = (bool, usize, usize)> {
    let block_size = block_size as usize;
    let nblk = size / block_size;
    let nleft = size % block_size;
    [(true, nblk, nblk * block_size), (false, nleft, nleft)]
        .into_iter()
        .filter(|(_, count, _)| *count > 0)
}

/// Round `size` up to whole words and check, that `buf_len` can hold it.
fn aligned_size(size: usize, buf_len: usize) -> SdioResult<usize> {
    match size.checked_next_multiple_of(4) {
        Some(aligned) if aligned <= buf_len => Ok(aligned),
        _ => {
            error!(
                "Buffer of {} bytes can't hold a transfer of {} bytes.",
                buf_len, size
            );
            Err(SdioError::InvalidArgument)
        }
    }
}

/// Narrow a chunk count to the width of the CMD53 count field.
fn block_count(count: usize) -> SdioResult<u16> {
    u16::try_from(count).map_err(|_| {
        error!("Transfer of {} blocks is too large.", count);
        SdioError::InvalidArgument
    })
}

impl<H: SdioHost, P: Platform> WilcSdio<H, P> {
    fn data_port(&self, address: u32) -> DataPort {
        let (function, register, windowed) = if address > 0 {
            (0, FBR_DATA_REG, true)
        } else {
            (1, F1_DATA_REG, false)
        };
        DataPort {
            function,
            register,
            windowed,
            increment: self.registers().stream_increment,
            block_size: self.block_size(function),
        }
    }
    /// Clear the transfer complete latch of chips, that have one.
    async fn ack_transfer(&self) -> SdioResult<()> {
        match self.registers().vmm {
            Some(vmm) => {
                self.write_register(vmm.host_vmm_tx_ctl, VMM_INT_CLR)
                    .await
            }
            None => Ok(()),
        }
    }
    /// Read `size` bytes from `address` into `buf`.
    ///
    /// An address of zero reads from the function 1 data port, everything else is read through
    /// the CSA window. The transfer is rounded up to whole words, so `buf` has to be large enough
    /// for that. Bytes in `buf` past `size` are left untouched.
    pub async fn read(&self, address: u32, buf: &mut [u8], size: usize) -> SdioResult<()> {
        let aligned = aligned_size(size, buf.len())?;
        let mut padding = [0u8; 3];
        padding[..aligned - size].copy_from_slice(&buf[size..aligned]);

        let port = self.data_port(address);
        let mut address = address;
        let mut cursor = 0;
        for (block_mode, count, bytes) in chunks(aligned, port.block_size) {
            if port.windowed {
                self.set_window(address).await?;
            }
            let cmd = Cmd53::read(
                port.function,
                port.register,
                block_mode,
                port.increment,
                block_count(count)?,
            )?;
            self.issue_block_read(
                BlockRequest::new(cmd, port.block_size),
                &mut buf[cursor..cursor + bytes],
            )
            .await
            .map_err(|err| {
                error!(
                    "Reading {} {} from {:#x} failed.",
                    count,
                    if block_mode { "blocks" } else { "bytes" },
                    address
                );
                err
            })?;
            self.ack_transfer().await?;
            if port.windowed {
                address += bytes as u32;
            }
            cursor += bytes;
        }

        buf[size..aligned].copy_from_slice(&padding[..aligned - size]);
        Ok(())
    }
    /// Write `size` bytes from `buf` to `address`.
    ///
    /// Addressing and rounding work like in [Self::read].
    pub async fn write(&self, address: u32, buf: &[u8], size: usize) -> SdioResult<()> {
        let aligned = aligned_size(size, buf.len())?;

        let port = self.data_port(address);
        let mut address = address;
        let mut cursor = 0;
        for (block_mode, count, bytes) in chunks(aligned, port.block_size) {
            if port.windowed {
                self.set_window(address).await?;
            }
            let cmd = Cmd53::write(
                port.function,
                port.register,
                block_mode,
                port.increment,
                block_count(count)?,
            )?;
            self.issue_block_write(
                BlockRequest::new(cmd, port.block_size),
                &buf[cursor..cursor + bytes],
            )
            .await
            .map_err(|err| {
                error!(
                    "Writing {} {} to {:#x} failed.",
                    count,
                    if block_mode { "blocks" } else { "bytes" },
                    address
                );
                err
            })?;
            self.ack_transfer().await?;
            if port.windowed {
                address += bytes as u32;
            }
            cursor += bytes;
        }
        Ok(())
    }
    /// Read a register through the CSA window and the function 0 data register.
    async fn read_windowed_register(&self, address: u32, increment: bool) -> SdioResult<u32> {
        self.set_window(address).await?;
        let cmd = Cmd53::read(0, FBR_DATA_REG, false, increment, SCRATCH_LEN as u16)?;
        let mut value = [0u8; SCRATCH_LEN];
        self.issue_block_read(
            BlockRequest::new(cmd, self.block_size(0)).with_scratch(),
            &mut value,
        )
        .await?;
        Ok(u32::from_le_bytes(value))
    }
    async fn read_function1_register(&self, address: u32) -> SdioResult<u32> {
        let cmd = Cmd53::read(1, address, false, true, SCRATCH_LEN as u16)?;
        let mut value = [0u8; SCRATCH_LEN];
        self.issue_block_read(
            BlockRequest::new(cmd, self.block_size(1)).with_scratch(),
            &mut value,
        )
        .await?;
        Ok(u32::from_le_bytes(value))
    }
    /// Read the 32-bit register at `address`.
    pub async fn read_register(&self, address: u32) -> SdioResult<u32> {
        let res = if address == WILCS02_CHIP_ID {
            self.read_windowed_register(address, false).await
        } else if address == WILC_CHIPID || address == WILC3000_CHIP_ID {
            self.read_windowed_register(address, true).await
        } else if VENDOR_REGS.contains(&address) {
            self.issue_single_byte(Cmd52::read(0, address)?)
                .await
                .map(u32::from)
        } else {
            match &self.registers().register_path {
                RegisterPath::Windowed => self.read_windowed_register(address, true).await,
                RegisterPath::Function1 { windowed_reads } if windowed_reads.contains(&address) => {
                    self.read_windowed_register(address, false).await
                }
                RegisterPath::Function1 { .. } => self.read_function1_register(address).await,
            }
        };
        res.map_err(|err| {
            error!("Failed to read register {:#x}.", address);
            err
        })
    }
    /// Write `value` to the 32-bit register at `address`.
    ///
    /// For vendor registers only the low byte is written.
    pub async fn write_register(&self, address: u32, value: u32) -> SdioResult<()> {
        let res = if VENDOR_REGS.contains(&address) {
            self.issue_single_byte(Cmd52::write(0, address, value as u8)?)
                .await
                .map(|_| ())
        } else {
            self.write_windowed_register(address, value).await
        };
        res.map_err(|err| {
            error!("Failed to write register {:#x}.", address);
            err
        })
    }
    async fn write_windowed_register(&self, address: u32, value: u32) -> SdioResult<()> {
        self.set_window(address).await?;
        let (function, register) = match self.registers().register_path {
            RegisterPath::Windowed => (0, FBR_DATA_REG),
            RegisterPath::Function1 { .. } => (1, address),
        };
        let cmd = Cmd53::write(function, register, false, true, SCRATCH_LEN as u16)?;
        self.issue_block_write(
            BlockRequest::new(cmd, self.block_size(function)).with_scratch(),
            &value.to_le_bytes(),
        )
        .await
    }
}
