#![cfg_attr(not(test), no_std)]

/// Shared I2C bus transactions with per-bus locking.
pub mod i2c;
/// Low-power mode blocking for bus users.
pub mod power;
pub mod rn487x;
pub mod serial;
