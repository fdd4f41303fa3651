//! Data/command mode switching.

use embassy_time::Instant;
use embedded_hal::digital::OutputPin;
use embedded_io_async::Write;
use log::debug;

use super::{Error, Rn487x};

const ENTER_COMMAND: &[u8] = b"$$$";
const COMMAND_PROMPT: &[u8] = b"CMD>";
const EXIT_COMMAND: &[u8] = b"---\r";
const EXIT_REPLY: &[u8] = b"END";

/// Serial link mode of the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// UART bytes are forwarded over the air.
    #[default]
    Data,
    /// UART carries line-oriented commands.
    Command,
}

impl<W: Write, P: OutputPin, const N: usize> Rn487x<'_, W, P, N> {
    /// Switch the module to `mode`. Does nothing if it is already there.
    pub async fn set_mode(&mut self, mode: Mode) -> Result<(), Error<W::Error>> {
        match mode {
            Mode::Data => self.set_data_mode().await,
            Mode::Command => self.set_command_mode().await,
        }
    }

    /// Send `$$$` and wait for the `CMD>` prompt.
    ///
    /// The module frames the guard sequence by inter-character timing, so
    /// nothing else may be written around it. On failure the module's mode
    /// is unknown; recover with [`init`](Self::init).
    pub async fn set_command_mode(&mut self) -> Result<(), Error<W::Error>> {
        if self.mode == Mode::Command {
            return Ok(());
        }
        self.rx.clear();
        self.transmit(&[ENTER_COMMAND]).await?;
        self.wait_until(COMMAND_PROMPT, self.config.response_timeout)
            .await?;
        debug!("RN487x entered command mode");
        self.mode = Mode::Command;
        Ok(())
    }

    /// Send `---\r` and wait for `END`.
    pub async fn set_data_mode(&mut self) -> Result<(), Error<W::Error>> {
        if self.mode == Mode::Data {
            return Ok(());
        }
        self.rx.clear();
        self.transmit(&[EXIT_COMMAND]).await?;
        self.buf.clear();
        self.collect(&[EXIT_REPLY], Instant::now() + self.config.response_timeout)
            .await?;
        debug!("RN487x entered data mode");
        self.mode = Mode::Data;
        Ok(())
    }
}
