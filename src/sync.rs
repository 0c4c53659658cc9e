use core::{future::poll_fn, task::Poll};

use portable_atomic::{AtomicU8, Ordering};

use atomic_waker::AtomicWaker;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqLockState {
    Free,
    /// An interrupt is being serviced.
    DeliveryActive,
    /// The interrupt is being released.
    TeardownPending,
}

/// Arbitrates between interrupt delivery and releasing the interrupt.
///
/// Delivery only starts from [IrqLockState::Free] and never waits. Teardown waits for an active
/// delivery to finish, before it takes the lock.
pub struct InterruptLock {
    state: AtomicU8,
    waker: AtomicWaker,
}
impl InterruptLock {
    const FREE: u8 = 0;
    const DELIVERY_ACTIVE: u8 = 1;
    const TEARDOWN_PENDING: u8 = 2;
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(Self::FREE),
            waker: AtomicWaker::new(),
        }
    }
    pub fn state(&self) -> IrqLockState {
        match self.state.load(Ordering::Acquire) {
            Self::DELIVERY_ACTIVE => IrqLockState::DeliveryActive,
            Self::TEARDOWN_PENDING => IrqLockState::TeardownPending,
            _ => IrqLockState::Free,
        }
    }
    /// Force the lock back to [IrqLockState::Free].
    pub fn reset(&self) {
        self.state.store(Self::FREE, Ordering::Release);
        self.waker.wake();
    }
    fn try_transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
    /// Try to start delivering an interrupt.
    ///
    /// Returns `false`, if the interrupt is being torn down or another delivery is in flight.
    pub fn try_begin_delivery(&self) -> bool {
        self.try_transition(Self::FREE, Self::DELIVERY_ACTIVE)
    }
    /// Finish a delivery and wake up a waiting teardown.
    pub fn end_delivery(&self) {
        self.try_transition(Self::DELIVERY_ACTIVE, Self::FREE);
        self.waker.wake();
    }
    /// Wait until no delivery is active and mark the lock as torn down.
    pub async fn begin_teardown(&self) {
        poll_fn(|cx| {
            if self.try_transition(Self::FREE, Self::TEARDOWN_PENDING) {
                return Poll::Ready(());
            }
            self.waker.register(cx.waker());
            // The delivery may have ended, before the waker was registered.
            if self.try_transition(Self::FREE, Self::TEARDOWN_PENDING) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
    /// Release the lock after the interrupt was torn down.
    pub fn end_teardown(&self) {
        self.try_transition(Self::TEARDOWN_PENDING, Self::FREE);
        self.waker.wake();
    }
}
impl Default for InterruptLock {
    fn default() -> Self {
        Self::new()
    }
}
