//! Command/response exchange.
//!
//! A command is one ASCII line terminated by `\r`. The module answers with
//! `AOK`, `ERR` or a payload, each followed by the `CMD>` prompt, or with a
//! reboot banner for commands that restart it. An exchange ends at the
//! prompt, so nothing of it is left to be mistaken for the next answer.

use embassy_time::Instant;
use embedded_hal::digital::OutputPin;
use embedded_io_async::Write;
use log::{debug, warn};

use super::{Error, Mode, REBOOT_BANNER, REBOOTING_BANNER, Rn487x};

const PROMPT: &[u8] = b"CMD>";

/// Ends of an exchange, checked as buffer suffixes. `AOK` and `ERR` are
/// status lines inside the body, not terminators.
const TERMINATORS: [&[u8]; 3] = [PROMPT, REBOOT_BANNER, REBOOTING_BANNER];

/// Classified response to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    /// Accepted (`AOK`, a bare prompt, or a reboot banner).
    Ok,
    /// Informational payload; read it from [`Rn487x::response`].
    Data,
    /// Rejected (`ERR`).
    Err,
}

/// Classify a response body with the prompt already removed.
pub fn classify(body: &[u8]) -> Reply {
    match body.trim_ascii() {
        b"AOK" | b"" => Reply::Ok,
        b"ERR" => Reply::Err,
        _ => Reply::Data,
    }
}

impl<W: Write, P: OutputPin, const N: usize> Rn487x<'_, W, P, N> {
    /// Send `line` and wait for the module's answer.
    ///
    /// Enters command mode first if needed. Commands that reboot the module
    /// leave it in data mode; all others leave it in command mode.
    pub async fn send_command(&mut self, line: &str) -> Result<Reply, Error<W::Error>> {
        self.set_command_mode().await?;

        self.rx.clear();
        self.buf.clear();
        self.transmit(&[line.as_bytes(), b"\r"]).await?;

        let deadline = Instant::now() + self.config.command_timeout;
        let reply = self
            .await_reply(deadline)
            .await
            .inspect_err(|e| warn!("RN487x command {:?} failed: {}", line, e))?;
        debug!("RN487x {:?} -> {:?}", line, reply);
        Ok(reply)
    }

    async fn await_reply(&mut self, deadline: Instant) -> Result<Reply, Error<W::Error>> {
        let matched = self.collect(&TERMINATORS, deadline).await?;
        match TERMINATORS[matched] {
            REBOOT_BANNER | REBOOTING_BANNER => {
                self.mode = Mode::Data;
                Ok(Reply::Ok)
            }
            _ => Ok(classify(self.body())),
        }
    }

    /// Response payload without the trailing prompt and whitespace.
    pub(super) fn body(&self) -> &[u8] {
        self.buf
            .strip_suffix(PROMPT)
            .unwrap_or(&self.buf[..])
            .trim_ascii()
    }
}
