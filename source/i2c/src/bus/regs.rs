//! Register-level access to one I<sup>2</sup>C controller.
//!
//! Each controller exposes four registers:
//!
//! | offset | width | name    |
//! |--------|-------|---------|
//! | `0x0`  | 8     | `DATA`  |
//! | `0x1`  | 8     | `CNT`   |
//! | `0x2`  | 16    | `CNTEX` |
//! | `0x4`  | 16    | `SCL`   |
use core::ptr::{self, NonNull};

use mycelium_bitfield::bitfield;

bitfield! {
    /// Register `CNT` (offset `0x1`)
    #[derive(PartialEq, Eq)]
    pub struct Cnt<u8> {
        /// Stop: end the transaction after this byte.
        pub const FINISH: bool;
        /// Start: send a START condition followed by `DATA`.
        pub const START: bool;
        /// Abort the current transaction.
        pub const CANCEL: bool;
        const _RESERVED_0 = 1;
        /// Acknowledge.
        ///
        /// When writing a read-direction command, setting this makes the
        /// controller `ACK` the received byte (more data follows). When read
        /// back after a write-direction step, it reports whether the slave
        /// acknowledged.
        pub const ACK: bool;
        /// Data direction: `true` for reads.
        pub const READ: bool;
        /// Raise the controller's interrupt line when the step completes.
        pub const IRQ_ENABLE: bool;
        /// General enable. Writing this starts the step.
        pub const ENABLE: bool;
    }
}

bitfield! {
    /// Register `CNTEX` (offset `0x2`)
    #[derive(PartialEq, Eq)]
    pub struct CntEx<u16> {
        const _RESERVED_0 = 1;
        /// Hold off until `SCL` is released by the slave (clock stretching).
        pub const WAIT_SCL_IDLE: bool;
    }
}

bitfield! {
    /// Register `SCL` (offset `0x4`)
    #[derive(PartialEq, Eq)]
    pub struct Scl<u16> {
        /// Duration of the low half of the clock.
        pub const LOW_DURATION = 6;
        const _RESERVED_0 = 2;
        /// Duration of the high half of the clock.
        pub const HIGH_DURATION = 5;
    }
}

/// Volatile access to a controller's registers.
///
/// Implemented by [`Mmio`] for real hardware, and by the simulated bus in
/// tests. Writes to [`Cnt`] start a protocol step; the controller raises its
/// interrupt once the step is complete.
pub trait Registers: Send + Sync + 'static {
    fn read_data(&self) -> u8;
    fn write_data(&self, data: u8);
    fn read_cnt(&self) -> Cnt;
    fn write_cnt(&self, cnt: Cnt);
    fn write_cntex(&self, cntex: CntEx);
    fn write_scl(&self, scl: Scl);
}

/// A memory-mapped controller register block.
#[derive(Debug)]
pub struct Mmio {
    base: NonNull<u8>,
}

// === impl Cnt ===

impl Cnt {
    /// A command with the enable bits set and nothing else.
    pub const fn command() -> Self {
        Self::from_bits(0b1100_0000)
    }
}

// === impl Mmio ===

impl Mmio {
    const DATA: usize = 0x0;
    const CNT: usize = 0x1;
    const CNTEX: usize = 0x2;
    const SCL: usize = 0x4;

    /// # Safety
    ///
    /// `base` must be the mapped address of a controller register block, and
    /// no other `Mmio` may exist for the same block.
    pub unsafe fn new(base: usize) -> Option<Self> {
        NonNull::new(base as *mut u8).map(|base| Self { base })
    }

    fn reg<T>(&self, offset: usize) -> *mut T {
        // safety: `offset` is one of the register offsets above, all of which
        // are inside the block and aligned for their width.
        unsafe { self.base.as_ptr().add(offset).cast() }
    }
}

// safety: the block is owned exclusively by this handle, and each register
// access is a single volatile load or store.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl Registers for Mmio {
    fn read_data(&self) -> u8 {
        unsafe { ptr::read_volatile(self.reg(Self::DATA)) }
    }

    fn write_data(&self, data: u8) {
        unsafe { ptr::write_volatile(self.reg(Self::DATA), data) }
    }

    fn read_cnt(&self) -> Cnt {
        Cnt::from_bits(unsafe { ptr::read_volatile(self.reg(Self::CNT)) })
    }

    fn write_cnt(&self, cnt: Cnt) {
        unsafe { ptr::write_volatile(self.reg(Self::CNT), cnt.bits()) }
    }

    fn write_cntex(&self, cntex: CntEx) {
        unsafe { ptr::write_volatile(self.reg(Self::CNTEX), cntex.bits()) }
    }

    fn write_scl(&self, scl: Scl) {
        unsafe { ptr::write_volatile(self.reg(Self::SCL), scl.bits()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cnt_layout() {
        let cnt = Cnt::command().with(Cnt::FINISH, true).with(Cnt::CANCEL, true);
        assert_eq!(cnt.bits(), 0b1100_0101);

        let cnt = Cnt::command().with(Cnt::ACK, true).with(Cnt::READ, true);
        assert_eq!(cnt.bits(), 0b1111_0000);

        assert_eq!(Cnt::command().with(Cnt::START, true).bits(), 0xC2);
    }

    #[test]
    fn timing_layout() {
        assert_eq!(CntEx::new().with(CntEx::WAIT_SCL_IDLE, true).bits(), 0b10);
        assert_eq!(Scl::new().with(Scl::HIGH_DURATION, 5).bits(), 5 << 8);
    }

    #[test]
    fn mmio_offsets() {
        let mut block = [0u16; 3];
        let mmio = unsafe { Mmio::new(block.as_mut_ptr() as usize) }.unwrap();
        mmio.write_data(0xAB);
        mmio.write_cnt(Cnt::command());
        mmio.write_cntex(CntEx::new().with(CntEx::WAIT_SCL_IDLE, true));
        mmio.write_scl(Scl::new().with(Scl::HIGH_DURATION, 5));
        assert_eq!(mmio.read_data(), 0xAB);
        assert_eq!(mmio.read_cnt(), Cnt::command());
        drop(mmio);
        assert_eq!(block[0].to_le_bytes(), [0xAB, 0xC0]);
        assert_eq!(block[1], 0b10);
        assert_eq!(block[2], 0x0500);
    }
}
