//! Simulated I2C controller with one register-file slave attached.

use std::cell::RefCell;

use super::Instance;
use super::regs::*;

/// Bus activity seen by the simulated slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    /// Address byte, including the R/W bit.
    Address(u8),
    AddressNack,
    Tx(u8),
    Rx { value: u8, acked: bool },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Address,
    Transmit,
    Receive,
}

struct State {
    cr1: u16,
    cr2: u16,
    oar1: u16,
    ccr: u16,
    trise: u16,
    sr1: u16,
    sr2: u16,
    phase: Phase,
    reading: bool,
    next_ack: bool,
    pointer_pending: bool,
    device: u8,
    file: [u8; 256],
    pointer: u8,
    nacks: u32,
    data_nack: Option<usize>,
    accepted: usize,
    pending_error: u16,
    wedged: bool,
    lose_arbitration: bool,
    clock: bool,
    gpio: bool,
    pins: Vec<(char, bool)>,
    events: Vec<Event>,
}

pub struct SimI2c {
    state: RefCell<State>,
}

impl SimI2c {
    pub fn with_device(address: u8) -> Self {
        Self {
            state: RefCell::new(State {
                cr1: 0,
                cr2: 0,
                oar1: 0,
                ccr: 0,
                trise: 0,
                sr1: 0,
                sr2: 0,
                phase: Phase::Idle,
                reading: false,
                next_ack: false,
                pointer_pending: false,
                device: address,
                file: [0; 256],
                pointer: 0,
                nacks: 0,
                data_nack: None,
                accepted: 0,
                pending_error: 0,
                wedged: false,
                lose_arbitration: false,
                clock: false,
                gpio: false,
                pins: Vec::new(),
                events: Vec::new(),
            }),
        }
    }

    /// Keep BUSY set until the controller is soft-reset.
    pub fn hold_line(&self) {
        self.state.borrow_mut().sr2 |= SR2_BUSY;
    }

    /// NACK the next `count` address bytes.
    pub fn nack_next(&self, count: u32) {
        self.state.borrow_mut().nacks = count;
    }

    /// NACK the data byte written after `accepted` bytes of the next
    /// transfer were taken.
    pub fn nack_data(&self, accepted: usize) {
        self.state.borrow_mut().data_nack = Some(accepted);
    }

    /// Raise an SR1 error `flag` on the next data byte in either direction.
    pub fn raise(&self, flag: u16) {
        self.state.borrow_mut().pending_error = flag;
    }

    /// Ignore START requests.
    pub fn wedge(&self) {
        self.state.borrow_mut().wedged = true;
    }

    /// Flag arbitration loss on the next START.
    pub fn lose_arbitration(&self) {
        self.state.borrow_mut().lose_arbitration = true;
    }

    /// Preload the slave's register file and set its pointer to `at`.
    pub fn load(&self, at: u8, bytes: &[u8]) {
        let mut s = self.state.borrow_mut();
        for (i, b) in bytes.iter().enumerate() {
            s.file[at as usize + i] = *b;
        }
        s.pointer = at;
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.state.borrow().file[reg as usize]
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn pin_log(&self) -> Vec<(char, bool)> {
        self.state.borrow().pins.clone()
    }

    pub fn clock_enabled(&self) -> bool {
        self.state.borrow().clock
    }

    pub fn lines_are_gpio(&self) -> bool {
        self.state.borrow().gpio
    }
}

impl State {
    fn enter_data_phase(&mut self) {
        if self.reading {
            self.phase = Phase::Receive;
            self.next_ack = self.cr1 & CR1_ACK != 0;
            self.sr1 |= SR1_RXNE;
        } else {
            self.phase = Phase::Transmit;
            self.pointer_pending = true;
            self.sr1 |= SR1_TXE;
        }
    }

    fn start(&mut self) {
        if self.wedged {
            return;
        }
        if self.lose_arbitration {
            self.lose_arbitration = false;
            self.sr1 |= SR1_ARLO;
            self.sr2 &= !SR2_MSL;
            return;
        }
        self.events.push(Event::Start);
        self.sr1 = (self.sr1 | SR1_SB) & !(SR1_TXE | SR1_RXNE | SR1_BTF);
        self.sr2 |= SR2_BUSY | SR2_MSL;
        self.phase = Phase::Address;
    }

    fn stop(&mut self) {
        self.events.push(Event::Stop);
        self.sr1 &= !(SR1_TXE | SR1_RXNE | SR1_BTF);
        self.sr2 &= !(SR2_BUSY | SR2_MSL);
        self.phase = Phase::Idle;
    }

    fn address(&mut self, byte: u8) {
        self.sr1 &= !SR1_SB;
        self.events.push(Event::Address(byte));
        if self.nacks > 0 || byte >> 1 != self.device {
            self.nacks = self.nacks.saturating_sub(1);
            self.events.push(Event::AddressNack);
            self.sr1 |= SR1_AF;
            return;
        }
        self.reading = byte & ADDR_READ != 0;
        self.accepted = 0;
        self.sr1 |= SR1_ADDR;
    }

    fn take_pending_error(&mut self) -> bool {
        if self.pending_error == 0 {
            return false;
        }
        self.sr1 |= self.pending_error;
        self.pending_error = 0;
        true
    }

    fn transmit(&mut self, byte: u8) {
        self.events.push(Event::Tx(byte));
        if self.take_pending_error() {
            return;
        }
        if self.data_nack == Some(self.accepted) {
            self.data_nack = None;
            self.sr1 |= SR1_AF;
            return;
        }
        self.accepted += 1;
        if self.pointer_pending {
            self.pointer = byte;
            self.pointer_pending = false;
        } else {
            self.file[self.pointer as usize] = byte;
            self.pointer = self.pointer.wrapping_add(1);
        }
        self.sr1 |= SR1_TXE | SR1_BTF;
    }

    fn receive(&mut self) -> u8 {
        let value = self.file[self.pointer as usize];
        self.pointer = self.pointer.wrapping_add(1);
        self.events.push(Event::Rx {
            value,
            acked: self.next_ack,
        });
        self.take_pending_error();
        // the next byte is clocked in with the current ACK setting
        self.next_ack = self.cr1 & CR1_ACK != 0;
        value
    }
}

impl RegisterBlock for SimI2c {
    fn read(&self, reg: Reg) -> u16 {
        let mut s = self.state.borrow_mut();
        match reg {
            Reg::Cr1 => s.cr1,
            Reg::Cr2 => s.cr2,
            Reg::Oar1 => s.oar1,
            Reg::Ccr => s.ccr,
            Reg::Trise => s.trise,
            Reg::Sr1 => s.sr1,
            Reg::Sr2 => {
                let value = s.sr2;
                if s.sr1 & SR1_ADDR != 0 {
                    s.sr1 &= !SR1_ADDR;
                    s.enter_data_phase();
                }
                value
            }
            Reg::Dr => match s.phase {
                Phase::Receive => u16::from(s.receive()),
                _ => 0,
            },
        }
    }

    fn write(&self, reg: Reg, value: u16) {
        let mut s = self.state.borrow_mut();
        match reg {
            Reg::Cr1 => {
                if value & CR1_SWRST != 0 {
                    s.cr1 = CR1_SWRST;
                    s.sr1 = 0;
                    s.sr2 = 0;
                    s.phase = Phase::Idle;
                    return;
                }
                s.cr1 = value & !(CR1_START | CR1_STOP);
                if value & CR1_START != 0 {
                    s.start();
                }
                if value & CR1_STOP != 0 {
                    s.stop();
                }
            }
            Reg::Cr2 => s.cr2 = value,
            Reg::Oar1 => s.oar1 = value,
            Reg::Ccr => s.ccr = value,
            Reg::Trise => s.trise = value,
            // error flags are cleared by writing 0
            Reg::Sr1 => s.sr1 &= value | !(SR1_AF | SR1_ARLO | SR1_BERR | SR1_OVR),
            Reg::Sr2 => {}
            Reg::Dr => match s.phase {
                Phase::Address if s.sr1 & SR1_SB != 0 => s.address(value as u8),
                Phase::Transmit => s.transmit(value as u8),
                _ => {}
            },
        }
    }
}

impl Instance for SimI2c {
    type Regs = Self;

    fn regs(&self) -> &Self {
        self
    }

    fn enable_clock(&self) {
        self.state.borrow_mut().clock = true;
    }

    fn disable_clock(&self) {
        self.state.borrow_mut().clock = false;
    }

    fn lines_to_gpio(&self) {
        self.state.borrow_mut().gpio = true;
    }

    fn lines_to_i2c(&self) {
        self.state.borrow_mut().gpio = false;
    }

    fn set_scl(&self, high: bool) {
        self.state.borrow_mut().pins.push(('s', high));
    }

    fn set_sda(&self, high: bool) {
        self.state.borrow_mut().pins.push(('d', high));
    }
}
