//! A model of the card and the board for unit tests.
//!
//! The chip keeps function 0 and function 1 register bytes, the memory behind the CSA window and
//! the function 1 data FIFO. Every command and hook call is recorded in a shared event log.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use embassy_futures::yield_now;

use crate::{
    bus::{HostError, SdioHost},
    cmd::{Cmd52, Cmd53},
    hif::{HostInterface, Platform},
    regs::{F1_DATA_REG, FBR_CSA_REG, FBR_DATA_REG, SDIO_CCCR_IORX, WILC_CHIPID},
    SdioConfig, WilcSdio,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub function: u8,
    pub address: u32,
}
impl Target {
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

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Cmd52 {
        target: Target,
        write: Option<u8>,
    },
    Cmd53 {
        target: Target,
        write: bool,
        block_mode: bool,
        increment: bool,
        len: usize,
    },
    BlockSize {
        function: u8,
        block_size: u16,
    },
    /// All three window bytes were written.
    Window(u32),
    ClaimIrq,
    ReleaseIrq,
    BrokenByteMode,
    Power(bool),
    PmGet,
    PmPut,
    Wakeup,
    AllowSleep,
    HostSleep,
    HostWake,
    IsrStart,
    IsrEnd,
    /// Pushed by tests, once `service_interrupt` returned.
    DeliveryDone,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

pub struct MockChip {
    pub log: EventLog,
    f0: HashMap<u32, u8>,
    f0_masks: HashMap<u32, u8>,
    f1: HashMap<u32, u8>,
    memory: HashMap<u32, u8>,
    fifo_read: VecDeque<u8>,
    fifo_written: Vec<u8>,
    failures: Vec<(Target, bool)>,
    block_sizes: [u16; 8],
    ior_reads: usize,
    /// Number of IORx reads, which report function 1 as not ready.
    pub ior_ready_after: usize,
    pub fail_irq_claim: bool,
    /// Status read by the last interrupt handler.
    pub last_status: Option<u32>,
}
impl MockChip {
    fn new() -> Self {
        let mut chip = Self {
            log: Rc::new(RefCell::new(Vec::new())),
            f0: HashMap::new(),
            f0_masks: HashMap::new(),
            f1: HashMap::new(),
            memory: HashMap::new(),
            fifo_read: VecDeque::new(),
            fifo_written: Vec::new(),
            failures: Vec::new(),
            block_sizes: [0; 8],
            ior_reads: 0,
            ior_ready_after: 0,
            fail_irq_claim: false,
            last_status: None,
        };
        chip.poke(WILC_CHIPID, 0x0010_03a0);
        chip
    }
    fn push(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }
    /// The address the CSA window points at.
    pub fn window(&self) -> u32 {
        u32::from_le_bytes([
            self.f0(FBR_CSA_REG),
            self.f0(FBR_CSA_REG + 1),
            self.f0(FBR_CSA_REG + 2),
            0,
        ])
    }
    pub fn f0(&self, address: u32) -> u8 {
        self.f0.get(&address).copied().unwrap_or(0)
    }
    pub fn set_f0(&mut self, address: u32, value: u8) {
        self.f0.insert(address, value);
    }
    /// Only let the bits in `mask` be written to the function 0 register at `address`.
    pub fn mask_f0(&mut self, address: u32, mask: u8) {
        self.f0_masks.insert(address, mask);
    }
    pub fn f1(&self, address: u32) -> u8 {
        self.f1.get(&address).copied().unwrap_or(0)
    }
    pub fn set_f1(&mut self, address: u32, value: u8) {
        self.f1.insert(address, value);
    }
    pub fn f1_word(&self, address: u32) -> u32 {
        u32::from_le_bytes(core::array::from_fn(|i| self.f1(address + i as u32)))
    }
    pub fn set_f1_word(&mut self, address: u32, value: u32) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.set_f1(address + i as u32, byte);
        }
    }
    /// Read a word of chip memory.
    pub fn peek(&self, address: u32) -> u32 {
        u32::from_le_bytes(core::array::from_fn(|i| {
            self.memory
                .get(&(address + i as u32))
                .copied()
                .unwrap_or(0)
        }))
    }
    /// Write a word of chip memory.
    pub fn poke(&mut self, address: u32, value: u32) {
        self.load(address, &value.to_le_bytes());
    }
    pub fn load(&mut self, address: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *byte);
        }
    }
    pub fn fifo_written(&self) -> &[u8] {
        &self.fifo_written
    }
    /// Fail the next command to `target` in the given direction.
    pub fn fail_once(&mut self, target: Target, write: bool) {
        self.failures.push((target, write));
    }
    fn take_failure(&mut self, target: Target, write: bool) -> Result<(), HostError> {
        match self
            .failures
            .iter()
            .position(|failure| *failure == (target, write))
        {
            Some(index) => {
                self.failures.remove(index);
                Err(HostError)
            }
            None => Ok(()),
        }
    }
    fn direct(&mut self, cmd: Cmd52) -> Result<u8, HostError> {
        assert!(!cmd.raw(), "Raw CMD52s are split up by the driver.");
        let target = Target {
            function: cmd.function(),
            address: cmd.address(),
        };
        let write = cmd.is_write().then_some(cmd.data());
        self.push(Event::Cmd52 { target, write });
        self.take_failure(target, cmd.is_write())?;

        match (target.function, write) {
            (0, None) if target.address == SDIO_CCCR_IORX => {
                let ready = self.ior_reads >= self.ior_ready_after;
                self.ior_reads += 1;
                Ok(if ready { 0x02 } else { 0x00 })
            }
            (0, None) => Ok(self.f0(target.address)),
            (0, Some(data)) => {
                let data = data & self.f0_masks.get(&target.address).copied().unwrap_or(0xff);
                self.set_f0(target.address, data);
                if target.address == FBR_CSA_REG + 2 {
                    self.push(Event::Window(self.window()));
                }
                Ok(data)
            }
            (_, None) => Ok(self.f1(target.address)),
            (_, Some(data)) => {
                self.set_f1(target.address, data);
                Ok(data)
            }
        }
    }
    fn extended(&mut self, cmd: Cmd53, len: usize) -> Result<(), HostError> {
        let target = Target {
            function: cmd.function(),
            address: cmd.address(),
        };
        assert_eq!(
            len,
            cmd.byte_count(self.block_sizes[target.function as usize])
        );
        self.push(Event::Cmd53 {
            target,
            write: cmd.is_write(),
            block_mode: cmd.block_mode(),
            increment: cmd.increment(),
            len,
        });
        self.take_failure(target, cmd.is_write())
    }
    fn extended_read(&mut self, cmd: Cmd53, buf: &mut [u8]) -> Result<(), HostError> {
        self.extended(cmd, buf.len())?;
        match (cmd.function(), cmd.address()) {
            (0, FBR_DATA_REG) => {
                let base = self.window();
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = self.memory.get(&(base + i as u32)).copied().unwrap_or(0);
                }
            }
            (1, F1_DATA_REG) => {
                for byte in buf.iter_mut() {
                    *byte = self.fifo_read.pop_front().unwrap_or(0);
                }
            }
            (1, address) => {
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = self.f1(address + i as u32);
                }
            }
            (function, address) => panic!("Unexpected CMD53 read of {function} {address:#x}."),
        }
        Ok(())
    }
    fn extended_write(&mut self, cmd: Cmd53, buf: &[u8]) -> Result<(), HostError> {
        self.extended(cmd, buf.len())?;
        match (cmd.function(), cmd.address()) {
            (0, FBR_DATA_REG) => {
                let base = self.window();
                self.load(base, buf);
            }
            (1, F1_DATA_REG) => self.fifo_written.extend_from_slice(buf),
            (1, address) => {
                for (i, byte) in buf.iter().enumerate() {
                    self.set_f1(address + i as u32, *byte);
                }
            }
            (function, address) => panic!("Unexpected CMD53 write of {function} {address:#x}."),
        }
        Ok(())
    }
}

pub struct MockHost {
    chip: Rc<RefCell<MockChip>>,
}
impl MockHost {
    pub fn new() -> (Self, Rc<RefCell<MockChip>>) {
        let chip = Rc::new(RefCell::new(MockChip::new()));
        (Self { chip: chip.clone() }, chip)
    }
    pub fn log(&self) -> EventLog {
        self.chip.borrow().log.clone()
    }
}
impl SdioHost for MockHost {
    async fn io_rw_direct(&mut self, cmd: Cmd52) -> Result<u8, HostError> {
        self.chip.borrow_mut().direct(cmd)
    }
    async fn io_rw_extended_read(&mut self, cmd: Cmd53, buf: &mut [u8]) -> Result<(), HostError> {
        self.chip.borrow_mut().extended_read(cmd, buf)
    }
    async fn io_rw_extended_write(&mut self, cmd: Cmd53, buf: &[u8]) -> Result<(), HostError> {
        self.chip.borrow_mut().extended_write(cmd, buf)
    }
    fn set_cur_block_size(&mut self, function: u8, block_size: u16) {
        let mut chip = self.chip.borrow_mut();
        chip.block_sizes[function as usize] = block_size;
        chip.push(Event::BlockSize {
            function,
            block_size,
        });
    }
    async fn claim_irq(&mut self) -> Result<(), HostError> {
        let chip = self.chip.borrow();
        chip.push(Event::ClaimIrq);
        if chip.fail_irq_claim {
            Err(HostError)
        } else {
            Ok(())
        }
    }
    async fn release_irq(&mut self) -> Result<(), HostError> {
        self.chip.borrow().push(Event::ReleaseIrq);
        Ok(())
    }
    fn set_broken_byte_mode_512(&mut self) {
        self.chip.borrow().push(Event::BrokenByteMode);
    }
}

pub struct MockPlatform {
    chip: Rc<RefCell<MockChip>>,
    /// How often the interrupt handler yields, before it returns.
    isr_yields: usize,
}
impl MockPlatform {
    pub fn new(chip: Rc<RefCell<MockChip>>, isr_yields: usize) -> Self {
        Self { chip, isr_yields }
    }
    fn push(&self, event: Event) {
        self.chip.borrow().push(event);
    }
}
impl Platform for MockPlatform {
    fn power(&self, on: bool) {
        self.push(Event::Power(on));
    }
    fn runtime_pm_get(&self) -> crate::SdioResult<()> {
        self.push(Event::PmGet);
        Ok(())
    }
    fn runtime_pm_put(&self) {
        self.push(Event::PmPut);
    }
    async fn chip_wakeup<B: HostInterface>(&self, _hif: &B) {
        self.push(Event::Wakeup);
    }
    async fn chip_allow_sleep<B: HostInterface>(&self, _hif: &B) {
        self.push(Event::AllowSleep);
    }
    async fn host_sleep_notify<B: HostInterface>(&self, _hif: &B) {
        self.push(Event::HostSleep);
    }
    async fn host_wakeup_notify<B: HostInterface>(&self, _hif: &B) {
        self.push(Event::HostWake);
    }
    async fn handle_isr<B: HostInterface>(&self, hif: &B) {
        self.push(Event::IsrStart);
        if let Ok(status) = hif.hif_read_int().await {
            self.chip.borrow_mut().last_status = Some(status.into_bits());
        }
        for _ in 0..self.isr_yields {
            yield_now().await;
        }
        self.push(Event::IsrEnd);
    }
}

pub type TestSession = WilcSdio<MockHost, MockPlatform>;

pub fn test_session_with(
    config: SdioConfig,
    isr_yields: usize,
) -> (TestSession, Rc<RefCell<MockChip>>) {
    let (host, chip) = MockHost::new();
    let platform = MockPlatform::new(chip.clone(), isr_yields);
    (WilcSdio::new(host, platform, config), chip)
}
pub fn test_session(config: SdioConfig) -> (TestSession, Rc<RefCell<MockChip>>) {
    test_session_with(config, 0)
}
