//! Command issuing over the bus lock, the CSA window and block size negotiation.

use embassy_sync::mutex::MutexGuard;

use crate::{
    cmd::{BlockRequest, Cmd52, Cmd53, SCRATCH_LEN},
    hif::Platform,
    regs::{sdio_fbr_base, CSA_ADDRESS_MAX, FBR_CSA_REG, SDIO_CCCR_BLKSIZE},
    DefaultRawMutex, SdioError, SdioResult, WilcSdio,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// A bus primitive of the host controller failed.
pub struct HostError;
impl From<HostError> for SdioError {
    fn from(_: HostError) -> Self {
        SdioError::Transport
    }
}

/// The SDIO host controller, to which the card is attached.
///
/// Implementations only have to move the command words onto the wire, all sequencing is done by
/// the driver.
pub trait SdioHost {
    /// Issue a CMD52 and return the data byte of the response.
    async fn io_rw_direct(&mut self, cmd: Cmd52) -> Result<u8, HostError>;
    /// Issue a reading CMD53, filling all of `buf`.
    async fn io_rw_extended_read(&mut self, cmd: Cmd53, buf: &mut [u8]) -> Result<(), HostError>;
    /// Issue a writing CMD53, sending all of `buf`.
    async fn io_rw_extended_write(&mut self, cmd: Cmd53, buf: &[u8]) -> Result<(), HostError>;
    /// Set the block size used for block mode transfers on `function`.
    fn set_cur_block_size(&mut self, function: u8, block_size: u16);
    /// Register the card interrupt with the host.
    async fn claim_irq(&mut self) -> Result<(), HostError>;
    /// Unregister the card interrupt.
    async fn release_irq(&mut self) -> Result<(), HostError>;
    /// The card can't handle byte mode transfers of 512 bytes.
    fn set_broken_byte_mode_512(&mut self) {}
}

/// State protected by the bus lock.
pub(crate) struct BusCore<H> {
    pub(crate) host: H,
    scratch: [u8; SCRATCH_LEN],
    /// Last address successfully written to the CSA window.
    pub(crate) window: Option<u32>,
}
impl<H: SdioHost> BusCore<H> {
    pub(crate) const fn new(host: H) -> Self {
        Self {
            host,
            scratch: [0; SCRATCH_LEN],
            window: None,
        }
    }
    async fn single_byte(&mut self, cmd: Cmd52) -> SdioResult<u8> {
        let res = if cmd.is_write() && cmd.raw() {
            // Write, then read back what the register holds now.
            match self.host.io_rw_direct(cmd.with_raw(false)).await {
                Ok(_) => {
                    self.host
                        .io_rw_direct(cmd.with_is_write(false).with_raw(false).with_data(0))
                        .await
                }
                Err(err) => Err(err),
            }
        } else {
            self.host.io_rw_direct(cmd).await
        };
        res.map_err(|err| {
            error!(
                "CMD52 failed. Function: {} Address: {:#x}",
                cmd.function(),
                cmd.address()
            );
            err.into()
        })
    }
    fn prepare_block(&mut self, req: &BlockRequest, buf_len: usize) -> SdioResult<usize> {
        self.host
            .set_cur_block_size(req.cmd.function(), req.block_size);
        let size = req.byte_count();
        if req.use_scratch && size > SCRATCH_LEN {
            error!(
                "Transfer of {} bytes doesn't fit into the scratch buffer.",
                size
            );
            return Err(SdioError::InvalidArgument);
        }
        if buf_len < size {
            error!(
                "Buffer of {} bytes is too small for a transfer of {} bytes.",
                buf_len, size
            );
            return Err(SdioError::InvalidArgument);
        }
        Ok(size)
    }
    fn log_block_failure(req: &BlockRequest, size: usize) {
        error!(
            "CMD53 {} failed. Address: {:#x} Size: {} Increment: {}",
            if req.cmd.is_write() { "write" } else { "read" },
            req.cmd.address(),
            size,
            req.cmd.increment()
        );
    }
    async fn block_read(&mut self, req: BlockRequest, buf: &mut [u8]) -> SdioResult<()> {
        let size = self.prepare_block(&req, buf.len())?;
        let res = if req.use_scratch {
            let res = self
                .host
                .io_rw_extended_read(req.cmd, &mut self.scratch[..size])
                .await;
            if res.is_ok() {
                buf[..size].copy_from_slice(&self.scratch[..size]);
            }
            res
        } else {
            self.host
                .io_rw_extended_read(req.cmd, &mut buf[..size])
                .await
        };
        res.map_err(|err| {
            Self::log_block_failure(&req, size);
            err.into()
        })
    }
    async fn block_write(&mut self, req: BlockRequest, buf: &[u8]) -> SdioResult<()> {
        let size = self.prepare_block(&req, buf.len())?;
        let res = if req.use_scratch {
            self.scratch[..size].copy_from_slice(&buf[..size]);
            self.host
                .io_rw_extended_write(req.cmd, &self.scratch[..size])
                .await
        } else {
            self.host.io_rw_extended_write(req.cmd, &buf[..size]).await
        };
        res.map_err(|err| {
            Self::log_block_failure(&req, size);
            err.into()
        })
    }
}

/// Exclusive access to the host, obtained through [WilcSdio::claim_host].
///
/// This is the equivalent of a claimed SDIO host and is what the host's interrupt dispatcher
/// holds, while calling [WilcSdio::service_interrupt].
pub struct HostClaim<'a, H: SdioHost>(pub(crate) MutexGuard<'a, DefaultRawMutex, BusCore<H>>);
impl<H: SdioHost> HostClaim<'_, H> {
    pub fn host(&mut self) -> &mut H {
        &mut self.0.host
    }
}

impl<H: SdioHost, P: Platform> WilcSdio<H, P> {
    /// Claim the host, blocking all other bus traffic until the claim is dropped.
    pub async fn claim_host(&self) -> HostClaim<'_, H> {
        HostClaim(self.bus.lock().await)
    }
    /// Issue a single CMD52.
    ///
    /// Returns the byte read from the chip. For raw writes this is the value read back after the
    /// write, for plain writes it's the written byte.
    pub async fn issue_single_byte(&self, cmd: Cmd52) -> SdioResult<u8> {
        self.bus.lock().await.single_byte(cmd).await
    }
    /// Issue a reading CMD53 into `buf`.
    pub async fn issue_block_read(&self, req: BlockRequest, buf: &mut [u8]) -> SdioResult<()> {
        self.bus.lock().await.block_read(req, buf).await
    }
    /// Issue a writing CMD53 from `buf`.
    pub async fn issue_block_write(&self, req: BlockRequest, buf: &[u8]) -> SdioResult<()> {
        self.bus.lock().await.block_write(req, buf).await
    }
    /// The address the CSA window currently points at.
    ///
    /// This is `None`, if the last update of the window failed part way.
    pub async fn window(&self) -> Option<u32> {
        self.bus.lock().await.window
    }
    /// Point the CSA window at `address`.
    ///
    /// The three window bytes are written one after another, so a failure leaves the window in an
    /// unknown state, which is why it's invalidated until the next successful update.
    pub async fn set_window(&self, address: u32) -> SdioResult<()> {
        if address > CSA_ADDRESS_MAX {
            error!("CSA address {:#x} out of range.", address);
            return Err(SdioError::InvalidArgument);
        }
        self.bus.lock().await.window = None;
        for (offset, byte) in address.to_le_bytes()[..3].iter().enumerate() {
            let register = FBR_CSA_REG + offset as u32;
            if let Err(err) = self
                .issue_single_byte(Cmd52::write(0, register, *byte)?)
                .await
            {
                error!("Failed to set CSA window byte at {:#x}.", register);
                return Err(err);
            }
        }
        self.bus.lock().await.window = Some(address);
        Ok(())
    }
    /// Negotiate the block size of `function`.
    pub async fn set_block_size(&self, function: u8, block_size: u16) -> SdioResult<()> {
        let base = sdio_fbr_base(function) + SDIO_CCCR_BLKSIZE;
        for (offset, byte) in block_size.to_le_bytes().iter().enumerate() {
            let register = base + offset as u32;
            if let Err(err) = self
                .issue_single_byte(Cmd52::write(0, register, *byte)?)
                .await
            {
                error!(
                    "Failed to set block size of function {} at {:#x}.",
                    function, register
                );
                return Err(err);
            }
        }
        if let Some(current) = self.block_sizes.get(function as usize) {
            current.store(block_size, portable_atomic::Ordering::Relaxed);
        }
        trace!("Function {} block size: {}", function, block_size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::mock::{test_session, Event, Target};

    #[test]
    fn raw_write_reads_back() {
        let (sdio, chip) = test_session(Default::default());
        chip.borrow_mut().mask_f0(0x04, 0x03);
        let value = block_on(sdio.issue_single_byte(Cmd52::write_raw(0, 0x04, 0xff).unwrap()));
        assert_eq!(value, Ok(0x03));
        let log = chip.borrow().log.borrow().clone();
        assert_eq!(
            log,
            [
                Event::Cmd52 {
                    target: Target::f0(0x04),
                    write: Some(0xff)
                },
                Event::Cmd52 {
                    target: Target::f0(0x04),
                    write: None
                },
            ]
        );
    }
    #[test]
    fn scratch_rejects_large_transfers() {
        let (sdio, chip) = test_session(Default::default());
        let mut buf = [0u8; 1024];
        for (block_mode, count) in [(false, 5), (false, 8), (true, 1), (true, 2)] {
            let req = BlockRequest::new(Cmd53::read(0, 0x10f, block_mode, true, count).unwrap(), 512)
                .with_scratch();
            assert_eq!(
                block_on(sdio.issue_block_read(req, &mut buf)),
                Err(SdioError::InvalidArgument)
            );
            let req = BlockRequest::new(Cmd53::write(0, 0x10f, block_mode, true, count).unwrap(), 512)
                .with_scratch();
            assert_eq!(
                block_on(sdio.issue_block_write(req, &buf)),
                Err(SdioError::InvalidArgument)
            );
        }
        // Only the block size side channel may have been touched.
        assert!(chip
            .borrow()
            .log
            .borrow()
            .iter()
            .all(|event| matches!(event, Event::BlockSize { .. })));
    }
    #[test]
    fn block_size_side_channel() {
        let (sdio, chip) = test_session(Default::default());
        let mut buf = [0u8; 4];
        let req = BlockRequest::new(Cmd53::read(1, 0, false, true, 4).unwrap(), 256).with_scratch();
        block_on(sdio.issue_block_read(req, &mut buf)).unwrap();
        assert_eq!(
            chip.borrow().log.borrow()[0],
            Event::BlockSize {
                function: 1,
                block_size: 256
            }
        );
    }
    #[test]
    fn window_bytes() {
        let (sdio, chip) = test_session(Default::default());
        block_on(sdio.set_window(0x01_2345)).unwrap();
        assert_eq!(block_on(sdio.window()), Some(0x01_2345));
        assert_eq!(chip.borrow().window(), 0x01_2345);
        assert_eq!(
            block_on(sdio.set_window(0x100_0000)),
            Err(SdioError::InvalidArgument)
        );
    }
    #[test]
    fn partial_window_update() {
        let (sdio, chip) = test_session(Default::default());
        block_on(sdio.set_window(0x1000)).unwrap();
        chip.borrow_mut().fail_once(Target::f0(FBR_CSA_REG + 1), true);
        assert_eq!(
            block_on(sdio.set_window(0x01_2345)),
            Err(SdioError::Transport)
        );
        assert_eq!(block_on(sdio.window()), None);

        // The next register access re-arms the window before touching the data port.
        chip.borrow_mut().poke(0x01_2344, 0xdead_beef);
        chip.borrow().log.borrow_mut().clear();
        assert_eq!(block_on(sdio.read_register(0x01_2344)), Ok(0xdead_beef));
        assert_eq!(block_on(sdio.window()), Some(0x01_2344));
        let log = chip.borrow().log.borrow().clone();
        let first_data_access = log
            .iter()
            .position(|event| matches!(event, Event::Cmd53 { .. }))
            .unwrap();
        let window_writes = log[..first_data_access]
            .iter()
            .filter(|event| {
                matches!(event, Event::Cmd52 { target, write: Some(_) } if (FBR_CSA_REG..FBR_CSA_REG + 3).contains(&target.address))
            })
            .count();
        assert_eq!(window_writes, 3);
    }
    #[test]
    fn block_size_negotiation() {
        let (sdio, chip) = test_session(Default::default());
        block_on(sdio.set_block_size(1, 256)).unwrap();
        assert_eq!(sdio.block_size(1), 256);
        assert_eq!(chip.borrow().f0(0x110), 0x00);
        assert_eq!(chip.borrow().f0(0x111), 0x01);

        chip.borrow_mut().fail_once(Target::f0(0x011), true);
        assert_eq!(
            block_on(sdio.set_block_size(0, 128)),
            Err(SdioError::Transport)
        );
        assert_eq!(sdio.block_size(0), 512);
    }
}
