//! Shared I2C bus transaction engine.
//!
//! Register-level master driver for the STM32 "v1" I2C controller with
//! 7-bit addressing. One [`I2c`] owns every configured bus; each bus has its
//! own lock, so transactions on the same bus never interleave while
//! different buses proceed independently.
//!
//! A transaction starts with [`I2c::acquire`], which waits for the bus lock,
//! blocks the power modes that would stop the bus clock and turns the
//! peripheral clock on. The returned [`BusGuard`] carries the byte and
//! register transfers. Dropping the guard releases the bus.
//!
//! Register waits are busy loops: the hardware answers within a few bus
//! clock cycles. With the default [`RetryPolicy`] neither the waits nor the
//! address retry on NACK are bounded, so a wedged bus or an absent device
//! hangs the caller. Use [`RetryPolicy::bounded`] to get [`Error::Timeout`]
//! and [`Error::NoAck`] instead.

mod config;
pub mod device;
pub mod regs;

#[cfg(test)]
mod sim;

use core::fmt;
use core::ops::BitOr;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{Duration, Instant};
use log::{debug, trace, warn};

pub use config::{BusConfig, Speed};
pub use device::I2cDevice;

use crate::power::{PowerManager, PowerMode};
use regs::*;

/// I2C error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Address not acknowledged after the configured number of retries.
    NoAck,
    /// A data byte was not acknowledged.
    Nack,
    /// Arbitration lost to another master.
    ArbitrationLost,
    /// Misplaced START or STOP detected on the bus.
    Bus,
    /// Overrun or underrun of the data register.
    Overrun,
    /// The hardware did not reach the expected state before the deadline.
    Timeout,
    /// Address does not fit in 7 bits.
    InvalidAddress,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoAck => write!(f, "address not acknowledged"),
            Error::Nack => write!(f, "data not acknowledged"),
            Error::ArbitrationLost => write!(f, "arbitration lost"),
            Error::Bus => write!(f, "bus error"),
            Error::Overrun => write!(f, "overrun"),
            Error::Timeout => write!(f, "timeout"),
            Error::InvalidAddress => write!(f, "address out of 7-bit range"),
        }
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match self {
            Error::NoAck => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Error::Nack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Error::ArbitrationLost => ErrorKind::ArbitrationLoss,
            Error::Bus => ErrorKind::Bus,
            Error::Overrun => ErrorKind::Overrun,
            Error::Timeout | Error::InvalidAddress => ErrorKind::Other,
        }
    }
}

/// Transfer flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Continue the previous transfer: no START, no address.
    pub const NO_START: Flags = Flags(1 << 0);
    /// Keep the bus: no STOP at the end.
    pub const NO_STOP: Flags = Flags(1 << 1);

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: Flags) -> Flags {
        Flags(self.0 & !other.0)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Limits on address retries and register waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    /// Retries of the START/address phase after a NACK. `None` retries
    /// forever.
    pub nack_retries: Option<u32>,
    /// Deadline for a whole transfer. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Retry every NACK and wait on every flag indefinitely.
    pub const UNBOUNDED: RetryPolicy = RetryPolicy {
        nack_retries: None,
        timeout: None,
    };

    pub const fn bounded(nack_retries: u32, timeout: Duration) -> Self {
        Self {
            nack_retries: Some(nack_retries),
            timeout: Some(timeout),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// Index of a configured bus, checked against the bus count `N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusId<const N: usize>(usize);

impl<const N: usize> BusId<N> {
    pub const fn new(index: usize) -> Option<Self> {
        if index < N { Some(Self(index)) } else { None }
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// One I2C controller as wired on the board.
///
/// Besides register access, the engine needs to gate the controller's
/// clock and to drive SCL/SDA as plain GPIOs for bus recovery.
pub trait Instance {
    type Regs: RegisterBlock;

    fn regs(&self) -> &Self::Regs;

    fn enable_clock(&self);

    fn disable_clock(&self);

    /// Switch SCL and SDA to open-drain GPIO outputs.
    fn lines_to_gpio(&self);

    /// Give SCL and SDA back to the controller.
    fn lines_to_i2c(&self);

    fn set_scl(&self, high: bool);

    fn set_sda(&self, high: bool);
}

#[derive(Clone, Copy)]
struct Timeout {
    deadline: Option<Instant>,
}

impl Timeout {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    #[inline]
    fn check(self) -> Result<(), Error> {
        match self.deadline {
            Some(deadline) if Instant::now() > deadline => Err(Error::Timeout),
            _ => Ok(()),
        }
    }
}

struct Bus<T> {
    config: BusConfig<T>,
    lock: Mutex<CriticalSectionRawMutex, ()>,
}

/// The I2C buses of the system.
pub struct I2c<T: Instance, P: PowerManager, const N: usize> {
    buses: [Bus<T>; N],
    pm: P,
    policy: RetryPolicy,
}

impl<T: Instance, P: PowerManager, const N: usize> I2c<T, P, N> {
    pub fn new(configs: [BusConfig<T>; N], pm: P, policy: RetryPolicy) -> Self {
        Self {
            buses: configs.map(|config| Bus {
                config,
                lock: Mutex::new(()),
            }),
            pm,
            policy,
        }
    }

    /// Checked handle for bus `index`.
    pub fn bus(&self, index: usize) -> Option<BusId<N>> {
        BusId::new(index)
    }

    pub fn power(&self) -> &P {
        &self.pm
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Configure a bus controller.
    ///
    /// Runs once at startup, before the first [`acquire`](Self::acquire) of
    /// this bus. If the line is busy right after configuration, a slave is
    /// holding SDA low; the bus is then recovered by clocking SCL by hand
    /// and soft-resetting the controller.
    pub fn init(&self, id: BusId<N>) {
        let config = &self.buses[id.index()].config;
        let instance = &config.instance;
        let regs = instance.regs();

        debug!("i2c{}: init, ccr {}", id.index(), config.ccr());
        instance.enable_clock();
        configure(config);

        if regs.read(Reg::Sr2) & SR2_BUSY != 0 {
            warn!("i2c{}: line busy after reset, recovering bus", id.index());
            regs.clear_bits(Reg::Cr1, CR1_PE);

            instance.lines_to_gpio();
            instance.set_sda(true);
            instance.set_scl(true);
            instance.set_sda(false);
            instance.set_scl(false);
            instance.set_sda(true);
            instance.set_scl(true);
            instance.lines_to_i2c();

            regs.set_bits(Reg::Cr1, CR1_SWRST);
            regs.clear_bits(Reg::Cr1, CR1_SWRST);
            configure(config);
        }
    }

    /// Take exclusive ownership of a bus.
    ///
    /// Suspends until no other transaction holds the bus. Cannot fail.
    pub async fn acquire(&self, id: BusId<N>) -> BusGuard<'_, T, P> {
        let bus = &self.buses[id.index()];
        let lock = bus.lock.lock().await;

        self.pm.block(PowerMode::BUS_CLOCK_STOP);
        bus.config.instance.enable_clock();

        BusGuard {
            instance: &bus.config.instance,
            pm: &self.pm,
            policy: self.policy,
            index: id.index(),
            _lock: lock,
        }
    }
}

fn configure<T: Instance>(config: &BusConfig<T>) {
    let regs = config.instance.regs();

    // disabled, ACK on
    regs.write(Reg::Cr1, CR1_ACK);
    regs.write(Reg::Cr2, config.freq_mhz());
    regs.write(Reg::Ccr, config.ccr());
    regs.write(Reg::Trise, config.trise());
    // 7-bit own address mode
    regs.write(Reg::Oar1, 0);
    regs.set_bits(Reg::Cr1, CR1_PE);
}

fn check_address(address: u8) -> Result<(), Error> {
    if address > 0x7F {
        return Err(Error::InvalidAddress);
    }
    Ok(())
}

/// Exclusive access to one bus.
///
/// Dropping the guard waits for the bus to go idle, gates the clock,
/// unblocks the power mode and releases the lock.
pub struct BusGuard<'a, T: Instance, P: PowerManager> {
    instance: &'a T,
    pm: &'a P,
    policy: RetryPolicy,
    index: usize,
    _lock: MutexGuard<'a, CriticalSectionRawMutex, ()>,
}

impl<T: Instance, P: PowerManager> BusGuard<'_, T, P> {
    /// Index of the held bus.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Give the bus back. Same as dropping the guard.
    pub fn release(self) {}

    /// Read `buf.len()` bytes from `address`.
    ///
    /// Returns the number of bytes read.
    pub fn read_bytes(&mut self, address: u8, buf: &mut [u8], flags: Flags) -> Result<usize, Error> {
        self.read_continued(address, buf, flags, 0)
    }

    /// Like [`read_bytes`](Self::read_bytes), with `following` more bytes
    /// to be read after `buf` without a new START. Only the last byte of
    /// the whole run is NACKed.
    pub(super) fn read_continued(
        &mut self,
        address: u8,
        buf: &mut [u8],
        flags: Flags,
        following: usize,
    ) -> Result<usize, Error> {
        check_address(address)?;
        let timeout = Timeout::new(self.policy.timeout);
        self.read(address, buf, flags, following, timeout)
            .inspect_err(|e| self.abort(*e))
    }

    /// Write `data` to `address`.
    ///
    /// Returns the number of bytes written.
    pub fn write_bytes(&mut self, address: u8, data: &[u8], flags: Flags) -> Result<usize, Error> {
        check_address(address)?;
        let timeout = Timeout::new(self.policy.timeout);
        self.write(address, data, flags, timeout)
            .inspect_err(|e| self.abort(*e))
    }

    /// Read `buf.len()` bytes starting at register `reg`.
    ///
    /// The register address is written without STOP, then the data is read
    /// after a repeated START.
    pub fn read_regs(
        &mut self,
        address: u8,
        reg: u8,
        buf: &mut [u8],
        flags: Flags,
    ) -> Result<usize, Error> {
        self.write_bytes(address, &[reg], Flags::NO_STOP)?;
        self.read_bytes(address, buf, flags.without(Flags::NO_START))
    }

    /// Write `data` starting at register `reg`, in a single transfer.
    pub fn write_regs(
        &mut self,
        address: u8,
        reg: u8,
        data: &[u8],
        flags: Flags,
    ) -> Result<usize, Error> {
        self.write_bytes(address, &[reg], flags | Flags::NO_STOP)?;
        self.write_bytes(address, data, flags | Flags::NO_START)
    }

    fn regs(&self) -> &T::Regs {
        self.instance.regs()
    }

    fn read(
        &self,
        address: u8,
        buf: &mut [u8],
        flags: Flags,
        following: usize,
        timeout: Timeout,
    ) -> Result<usize, Error> {
        let regs = self.regs();

        if !flags.contains(Flags::NO_START) {
            self.start(address, ADDR_READ, timeout)?;
        }

        let len = buf.len();
        let run = len + following;
        if run == 1 {
            regs.clear_bits(Reg::Cr1, CR1_ACK);
        } else {
            regs.set_bits(Reg::Cr1, CR1_ACK);
        }

        self.clear_addr();

        for (i, byte) in buf.iter_mut().enumerate() {
            self.wait_sr1(SR1_RXNE, timeout)?;

            // NACK the final byte of the run: ACK must be off before it arrives
            if run - i == 2 {
                regs.clear_bits(Reg::Cr1, CR1_ACK);
            }

            *byte = regs.read(Reg::Dr) as u8;
        }

        if !flags.contains(Flags::NO_STOP) {
            regs.set_bits(Reg::Cr1, CR1_STOP);
            while regs.read(Reg::Cr1) & CR1_STOP != 0 {
                timeout.check()?;
            }
        }

        Ok(len)
    }

    fn write(
        &self,
        address: u8,
        data: &[u8],
        flags: Flags,
        timeout: Timeout,
    ) -> Result<usize, Error> {
        if !flags.contains(Flags::NO_START) {
            self.start(address, ADDR_WRITE, timeout)?;
        }

        self.clear_addr();

        for byte in data {
            self.regs().write(Reg::Dr, u16::from(*byte));
            self.wait_sr1(SR1_TXE, timeout)?;
        }

        if !flags.contains(Flags::NO_STOP) {
            // let the last byte leave the shift register first
            self.wait_sr1(SR1_BTF, timeout)?;
            self.regs().set_bits(Reg::Cr1, CR1_STOP);
        }

        Ok(data.len())
    }

    /// START condition and address phase. A NACK on the address restarts
    /// the whole sequence.
    fn start(&self, address: u8, rw: u8, timeout: Timeout) -> Result<(), Error> {
        let regs = self.regs();
        let mut retries = 0u32;

        loop {
            regs.set_bits(Reg::Cr1, CR1_START);
            self.wait_sr1(SR1_SB, timeout)?;

            regs.write(Reg::Dr, u16::from((address << 1) | rw));

            loop {
                let sr1 = regs.read(Reg::Sr1);
                if sr1 & SR1_ADDR != 0 {
                    return Ok(());
                }
                if sr1 & SR1_AF != 0 {
                    regs.clear_bits(Reg::Sr1, SR1_AF);
                    break;
                }
                self.take_error(sr1)?;
                timeout.check()?;
            }

            retries += 1;
            if let Some(max) = self.policy.nack_retries {
                if retries > max {
                    debug!("i2c{}: 0x{:02x} not answering", self.index, address);
                    regs.set_bits(Reg::Cr1, CR1_STOP);
                    return Err(Error::NoAck);
                }
            }
            trace!("i2c{}: NACK from 0x{:02x}, retry {}", self.index, address, retries);
        }
    }

    /// Reading SR1 then SR2 clears ADDR.
    fn clear_addr(&self) {
        let regs = self.regs();
        let _ = regs.read(Reg::Sr1);
        let _ = regs.read(Reg::Sr2);
    }

    fn wait_sr1(&self, mask: u16, timeout: Timeout) -> Result<(), Error> {
        loop {
            let sr1 = self.take_error(self.regs().read(Reg::Sr1))?;
            if sr1 & mask != 0 {
                return Ok(());
            }
            timeout.check()?;
        }
    }

    /// Turn a hardware error flag into an [`Error`], clearing the flag.
    fn take_error(&self, sr1: u16) -> Result<u16, Error> {
        let (flag, error) = if sr1 & SR1_ARLO != 0 {
            (SR1_ARLO, Error::ArbitrationLost)
        } else if sr1 & SR1_BERR != 0 {
            (SR1_BERR, Error::Bus)
        } else if sr1 & SR1_OVR != 0 {
            (SR1_OVR, Error::Overrun)
        } else if sr1 & SR1_AF != 0 {
            (SR1_AF, Error::Nack)
        } else {
            return Ok(sr1);
        };

        self.regs().clear_bits(Reg::Sr1, flag);
        Err(error)
    }

    /// Free the bus after a failed transfer. STOP is only sent while the
    /// controller is still master: arbitration loss drops it to slave mode
    /// and `NoAck` has already sent its own.
    fn abort(&self, error: Error) {
        if error == Error::InvalidAddress {
            return;
        }
        let regs = self.regs();
        if regs.read(Reg::Sr2) & SR2_MSL != 0 {
            warn!("i2c{}: transfer aborted: {}", self.index, error);
            regs.set_bits(Reg::Cr1, CR1_STOP);
        }
    }
}

impl<T: Instance, P: PowerManager> Drop for BusGuard<'_, T, P> {
    fn drop(&mut self) {
        let timeout = Timeout::new(self.policy.timeout);
        while self.regs().read(Reg::Sr2) & SR2_BUSY != 0 {
            if timeout.check().is_err() {
                warn!("i2c{}: bus still busy on release", self.index);
                break;
            }
        }

        self.instance.disable_clock();
        self.pm.unblock(PowerMode::BUS_CLOCK_STOP);
    }
}
