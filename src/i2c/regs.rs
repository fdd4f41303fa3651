//! Register map of the I2C controller (STM32 F1/F2/F4/L1 "v1" layout).

/// Controller registers, by byte offset from the peripheral base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    Cr1,
    Cr2,
    Oar1,
    Dr,
    Sr1,
    Sr2,
    Ccr,
    Trise,
}

impl Reg {
    pub const fn offset(self) -> usize {
        match self {
            Reg::Cr1 => 0x00,
            Reg::Cr2 => 0x04,
            Reg::Oar1 => 0x08,
            Reg::Dr => 0x10,
            Reg::Sr1 => 0x14,
            Reg::Sr2 => 0x18,
            Reg::Ccr => 0x1C,
            Reg::Trise => 0x20,
        }
    }
}

/// CR1: peripheral enable
pub const CR1_PE: u16 = 1 << 0;
/// CR1: generate START
pub const CR1_START: u16 = 1 << 8;
/// CR1: generate STOP
pub const CR1_STOP: u16 = 1 << 9;
/// CR1: acknowledge received bytes
pub const CR1_ACK: u16 = 1 << 10;
/// CR1: software reset
pub const CR1_SWRST: u16 = 1 << 15;

/// SR1: start condition generated
pub const SR1_SB: u16 = 1 << 0;
/// SR1: address sent and acknowledged
pub const SR1_ADDR: u16 = 1 << 1;
/// SR1: byte transfer finished
pub const SR1_BTF: u16 = 1 << 2;
/// SR1: data register not empty (receiving)
pub const SR1_RXNE: u16 = 1 << 6;
/// SR1: data register empty (transmitting)
pub const SR1_TXE: u16 = 1 << 7;
/// SR1: bus error
pub const SR1_BERR: u16 = 1 << 8;
/// SR1: arbitration lost
pub const SR1_ARLO: u16 = 1 << 9;
/// SR1: acknowledge failure
pub const SR1_AF: u16 = 1 << 10;
/// SR1: overrun/underrun
pub const SR1_OVR: u16 = 1 << 11;

/// SR2: master mode
pub const SR2_MSL: u16 = 1 << 0;
/// SR2: bus busy
pub const SR2_BUSY: u16 = 1 << 1;

/// Read/write bit of the address byte.
pub const ADDR_READ: u8 = 1;
pub const ADDR_WRITE: u8 = 0;

/// Access to one controller's registers.
///
/// Reads have side effects on this peripheral (SR1 followed by SR2 clears
/// ADDR), so implementations must not cache.
pub trait RegisterBlock {
    fn read(&self, reg: Reg) -> u16;

    fn write(&self, reg: Reg, value: u16);

    fn modify(&self, reg: Reg, f: impl FnOnce(u16) -> u16) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }

    fn set_bits(&self, reg: Reg, bits: u16) {
        self.modify(reg, |v| v | bits);
    }

    fn clear_bits(&self, reg: Reg, bits: u16) {
        self.modify(reg, |v| v & !bits);
    }
}

/// Memory-mapped register block at a fixed base address.
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the base address of an I2C v1 controller, and no
    /// other code may access that controller while this value is in use.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn ptr(&self, reg: Reg) -> *mut u32 {
        (self.base + reg.offset()) as *mut u32
    }
}

impl RegisterBlock for Mmio {
    fn read(&self, reg: Reg) -> u16 {
        // SAFETY: the constructor contract guarantees a valid, exclusive
        // register block.
        unsafe { self.ptr(reg).read_volatile() as u16 }
    }

    fn write(&self, reg: Reg, value: u16) {
        // SAFETY: see `read`.
        unsafe { self.ptr(reg).write_volatile(value as u32) }
    }
}
