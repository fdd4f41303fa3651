//! Driver for the Microchip RN4870/1 BLE module over UART.
//!
//! The module powers up in data mode, where every byte on the UART is
//! forwarded over the air. Configuration happens in command mode, entered
//! with the `$$$` guard sequence and left with `---\r`. [`Rn487x`] tracks
//! which mode the module is in and switches transparently before each
//! command.
//!
//! Transmit goes straight to the UART; receive comes through an
//! [`RxQueue`] fed by the UART interrupt or a [`pump`](crate::serial::pump)
//! task.

mod command;
pub mod config;
mod mode;
#[cfg(test)]
mod peer;

use core::convert::Infallible;
use core::fmt::{self, Write as _};

use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_io_async::Write;
use heapless::{String, Vec};
use log::{debug, info, warn};

pub use command::{Reply, classify};
pub use config::Config;
pub use mode::Mode;

use crate::serial::{RX_QUEUE_SIZE, RxQueue};

/// Capacity of the response buffer.
pub const RESPONSE_SIZE: usize = 256;

/// Longest device name accepted by `SN`.
pub const MAX_NAME_LEN: usize = 20;

const REBOOT_BANNER: &[u8] = b"%REBOOT%";
const REBOOTING_BANNER: &[u8] = b"Rebooting\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// UART write failed.
    Serial(E),
    /// The module did not answer in time.
    Timeout,
    /// The module answered with something other than what was expected.
    UnexpectedResponse,
    /// The module rejected a command with `ERR`.
    Rejected,
    /// A response filled the buffer without a terminator.
    ResponseOverflow,
    /// Argument does not fit the command.
    InvalidArgument,
    /// Driving the reset or wake pin failed.
    Pin,
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Serial(e) => write!(f, "serial error: {:?}", e),
            Error::Timeout => write!(f, "no response from module"),
            Error::UnexpectedResponse => write!(f, "unexpected response from module"),
            Error::Rejected => write!(f, "command rejected"),
            Error::ResponseOverflow => write!(f, "response too long"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::Pin => write!(f, "pin error"),
        }
    }
}

/// Placeholder for an unconnected reset or wake pin.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// One attached RN4870/1.
///
/// Exchanges are strictly sequential; share between tasks behind a mutex.
pub struct Rn487x<'a, W: Write, P: OutputPin, const N: usize = RX_QUEUE_SIZE> {
    uart: W,
    rx: &'a RxQueue<N>,
    config: Config,
    reset_pin: Option<P>,
    wake_pin: Option<P>,
    buf: Vec<u8, RESPONSE_SIZE>,
    mode: Mode,
}

impl<'a, W: Write, P: OutputPin, const N: usize> Rn487x<'a, W, P, N> {
    /// Bind the driver to its UART and pins. Nothing is sent until [`init`].
    ///
    /// [`init`]: Self::init
    pub fn new(
        config: Config,
        uart: W,
        rx: &'a RxQueue<N>,
        reset_pin: Option<P>,
        wake_pin: Option<P>,
    ) -> Self {
        Self {
            uart,
            rx,
            config,
            reset_pin,
            wake_pin,
            buf: Vec::new(),
            mode: Mode::Data,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mode the driver believes the module is in.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Raw bytes received during the last exchange.
    pub fn response(&self) -> &[u8] {
        &self.buf
    }

    /// Reset the module and bring it into command mode.
    ///
    /// Pulses the reset pin and asserts the wake pin when present, then
    /// waits for the boot banner. On failure the module is left in data
    /// mode and `init` can be retried from scratch.
    pub async fn init(&mut self) -> Result<(), Error<W::Error>> {
        self.mode = Mode::Data;

        if let Some(pin) = self.reset_pin.as_mut() {
            // stale bytes from before the reset would hide the banner
            self.rx.clear();
            pin.set_low().map_err(|_| Error::Pin)?;
            Timer::after(self.config.reset_hold).await;
            pin.set_high().map_err(|_| Error::Pin)?;
            Timer::after(self.config.boot_delay).await;
        }

        if let Some(pin) = self.wake_pin.as_mut() {
            pin.set_low().map_err(|_| Error::Pin)?;
            Timer::after(self.config.wake_hold).await;
        }

        self.wait_until(REBOOT_BANNER, self.config.response_timeout)
            .await
            .inspect_err(|e| warn!("RN487x boot banner not received: {}", e))?;

        self.mode = Mode::Data;
        self.set_command_mode().await?;
        info!("RN487x ready");
        Ok(())
    }

    /// Software reboot (`R,1`). The module comes back in data mode.
    pub async fn reset(&mut self) -> Result<(), Error<W::Error>> {
        self.send_command("R,1").await?;
        if !self.buf.ends_with(REBOOTING_BANNER) {
            return Err(Error::UnexpectedResponse);
        }
        self.mode = Mode::Data;
        Ok(())
    }

    /// Restore factory settings (`SF,1`). The module reboots into data mode.
    pub async fn factory_reset(&mut self) -> Result<(), Error<W::Error>> {
        self.send_command("SF,1").await?;
        if !self.buf.ends_with(REBOOT_BANNER) {
            return Err(Error::UnexpectedResponse);
        }
        self.mode = Mode::Data;
        Ok(())
    }

    /// Firmware version string (`V`).
    pub async fn version(&mut self) -> Result<&str, Error<W::Error>> {
        match self.send_command("V").await? {
            Reply::Data => {}
            Reply::Err => return Err(Error::Rejected),
            Reply::Ok => return Err(Error::UnexpectedResponse),
        }
        core::str::from_utf8(self.body()).map_err(|_| Error::UnexpectedResponse)
    }

    /// Set the advertised device name (`SN,<name>`). Takes effect after reboot.
    pub async fn set_name(&mut self, name: &str) -> Result<(), Error<W::Error>> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidArgument);
        }
        let mut line: String<{ MAX_NAME_LEN + 3 }> = String::new();
        write!(line, "SN,{}", name).map_err(|_| Error::InvalidArgument)?;
        self.expect_ok(&line).await
    }

    async fn expect_ok(&mut self, line: &str) -> Result<(), Error<W::Error>> {
        match self.send_command(line).await? {
            Reply::Ok => Ok(()),
            Reply::Err => Err(Error::Rejected),
            Reply::Data => Err(Error::UnexpectedResponse),
        }
    }

    /// Write `parts` back to back and flush.
    async fn transmit(&mut self, parts: &[&[u8]]) -> Result<(), Error<W::Error>> {
        for part in parts {
            self.uart.write_all(part).await.map_err(Error::Serial)?;
        }
        self.uart.flush().await.map_err(Error::Serial)
    }

    /// Receive exactly `expected`, failing on the first diverging byte.
    async fn wait_until(&mut self, expected: &[u8], timeout: Duration) -> Result<(), Error<W::Error>> {
        self.buf.clear();
        let rx = self.rx;
        let deadline = Instant::now() + timeout;
        for want in expected {
            let byte = rx.read_byte(deadline).await.ok_or(Error::Timeout)?;
            self.buf.push(byte).map_err(|_| Error::ResponseOverflow)?;
            if byte != *want {
                debug!("expected {:?}, got {:?}", *want as char, byte as char);
                return Err(Error::UnexpectedResponse);
            }
        }
        Ok(())
    }

    /// Append to the response buffer until it ends with one of
    /// `terminators`. Returns the index of the one that matched.
    async fn collect(&mut self, terminators: &[&[u8]], deadline: Instant) -> Result<usize, Error<W::Error>> {
        let rx = self.rx;
        loop {
            let byte = rx.read_byte(deadline).await.ok_or(Error::Timeout)?;
            self.buf.push(byte).map_err(|_| Error::ResponseOverflow)?;
            if let Some(i) = terminators.iter().position(|t| self.buf.ends_with(t)) {
                return Ok(i);
            }
        }
    }
}
