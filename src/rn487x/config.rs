//! Module configuration record.

use embassy_time::Duration;
use log::{info, warn};

const DEFAULT_BAUDRATE: u32 = 115_200;
const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 500;

/// Link and timing parameters for one RN4870/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// UART baud rate the module is strapped to.
    pub baudrate: u32,
    /// Wait for mode-switch replies and the boot banner.
    pub response_timeout: Duration,
    /// Wait for a command's terminator.
    pub command_timeout: Duration,
    /// Reset pin low time.
    pub reset_hold: Duration,
    /// Settle time after releasing reset.
    pub boot_delay: Duration,
    /// Wake pin low time.
    pub wake_hold: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baudrate: DEFAULT_BAUDRATE,
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            command_timeout: Duration::from_secs(5),
            reset_hold: Duration::from_millis(10),
            boot_delay: Duration::from_millis(500),
            wake_hold: Duration::from_millis(5),
        }
    }
}

impl Config {
    pub fn with_baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_reset_hold(mut self, hold: Duration) -> Self {
        self.reset_hold = hold;
        self
    }

    pub fn with_boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    pub fn with_wake_hold(mut self, hold: Duration) -> Self {
        self.wake_hold = hold;
        self
    }

    /// Defaults, overridden by `RN487X_BAUDRATE` and
    /// `RN487X_RESPONSE_TIMEOUT_MS` when set at build time.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Baud rates supported by the module's `SB` command
        config.baudrate = if let Some(baud_str) = option_env!("RN487X_BAUDRATE") {
            parse_baudrate(baud_str)
        } else {
            info!("Baud rate not configured, using default {}", DEFAULT_BAUDRATE);
            DEFAULT_BAUDRATE
        };

        if let Some(timeout_str) = option_env!("RN487X_RESPONSE_TIMEOUT_MS") {
            config.response_timeout = Duration::from_millis(parse_response_timeout(timeout_str));
        }

        config
    }
}

fn parse_baudrate(value: &str) -> u32 {
    match value.parse::<u32>() {
        Ok(v @ (2400 | 9600 | 19_200 | 28_800 | 38_400 | 57_600 | 115_200 | 230_400 | 460_800
        | 921_600)) => {
            info!("Using baud rate from config: {}", v);
            v
        }
        Ok(v) => {
            warn!(
                "Baud rate {} not supported by the module, using default {}",
                v, DEFAULT_BAUDRATE
            );
            DEFAULT_BAUDRATE
        }
        Err(_) => {
            warn!(
                "Invalid baud rate '{}', using default {}",
                value, DEFAULT_BAUDRATE
            );
            DEFAULT_BAUDRATE
        }
    }
}

fn parse_response_timeout(value: &str) -> u64 {
    match value.parse::<u64>() {
        Ok(v) if (50..=10_000).contains(&v) => {
            info!("Using response timeout from config: {} ms", v);
            v
        }
        Ok(v) => {
            warn!(
                "Response timeout {} ms out of range (50 to 10000), using default {} ms",
                v, DEFAULT_RESPONSE_TIMEOUT_MS
            );
            DEFAULT_RESPONSE_TIMEOUT_MS
        }
        Err(_) => {
            warn!(
                "Invalid response timeout '{}', using default {} ms",
                value, DEFAULT_RESPONSE_TIMEOUT_MS
            );
            DEFAULT_RESPONSE_TIMEOUT_MS
        }
    }
}
