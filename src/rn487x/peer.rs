//! Scripted RN487x stand-in for tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::serial::RxQueue;

/// Answers each expected transmission by queueing a canned reply.
pub struct Peer<'a> {
    rx: &'a RxQueue,
    script: RefCell<VecDeque<(&'static [u8], &'static [u8])>>,
    sent: RefCell<Vec<u8>>,
}

impl<'a> Peer<'a> {
    pub fn new(rx: &'a RxQueue) -> Self {
        Self {
            rx,
            script: RefCell::new(VecDeque::new()),
            sent: RefCell::new(Vec::new()),
        }
    }

    /// Once everything sent so far ends with `trigger`, queue `reply`.
    /// Triggers fire in the order they were added.
    pub fn reply(self, trigger: &'static [u8], reply: &'static [u8]) -> Self {
        self.script.borrow_mut().push_back((trigger, reply));
        self
    }

    pub fn tx(&self) -> PeerTx<'_, 'a> {
        PeerTx { peer: self }
    }

    /// Everything the driver transmitted.
    pub fn sent(&self) -> Vec<u8> {
        self.sent.borrow().clone()
    }

    fn receive(&self, bytes: &[u8]) {
        let mut sent = self.sent.borrow_mut();
        sent.extend_from_slice(bytes);

        let mut script = self.script.borrow_mut();
        if let Some((trigger, reply)) = script.front().copied() {
            if sent.ends_with(trigger) {
                script.pop_front();
                for b in reply {
                    self.rx.write_one(*b);
                }
            }
        }
    }
}

/// UART transmit half connected to a [`Peer`].
pub struct PeerTx<'p, 'a> {
    peer: &'p Peer<'a>,
}

impl embedded_io_async::ErrorType for PeerTx<'_, '_> {
    type Error = Infallible;
}

impl embedded_io_async::Write for PeerTx<'_, '_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.peer.receive(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Records pin transitions across several [`MockPin`]s.
#[derive(Default)]
pub struct PinLog {
    log: RefCell<Vec<(char, bool)>>,
}

impl PinLog {
    pub fn pin(&self, name: char) -> MockPin<'_> {
        MockPin {
            name,
            log: self,
            on_release: None,
        }
    }

    pub fn log(&self) -> Vec<(char, bool)> {
        self.log.borrow().clone()
    }
}

pub struct MockPin<'a> {
    name: char,
    log: &'a PinLog,
    on_release: Option<(&'a RxQueue, &'static [u8])>,
}

impl<'a> MockPin<'a> {
    /// Queue `banner` when the pin goes high, like a module leaving reset.
    pub fn on_release(mut self, rx: &'a RxQueue, banner: &'static [u8]) -> Self {
        self.on_release = Some((rx, banner));
        self
    }
}

impl ErrorType for MockPin<'_> {
    type Error = Infallible;
}

impl OutputPin for MockPin<'_> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.log.log.borrow_mut().push((self.name, false));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.log.log.borrow_mut().push((self.name, true));
        if let Some((rx, banner)) = self.on_release {
            for b in banner {
                rx.write_one(*b);
            }
        }
        Ok(())
    }
}
