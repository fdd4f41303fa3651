//! Low-power mode blocking shared by every bus driver.
//!
//! A driver that needs its peripheral clock running blocks the lowest power
//! mode that would gate that clock, and unblocks it once the hardware is idle
//! again. The counts are kept here, not in the drivers, so several buses can
//! hold the same mode at once.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// Power modes, ordered from shallowest to deepest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerMode {
    /// CPU clock stopped, peripherals running.
    Sleep = 0,
    /// All peripheral bus clocks stopped, RAM retained.
    Stop = 1,
    /// Everything off except the wakeup logic.
    Standby = 2,
}

impl PowerMode {
    /// Number of modes.
    pub const COUNT: usize = 3;

    /// All modes, shallowest first.
    pub const ALL: [PowerMode; Self::COUNT] = [Self::Sleep, Self::Stop, Self::Standby];

    /// Shallowest mode that gates the peripheral bus clocks. Blocked for the
    /// duration of every bus transaction.
    pub const BUS_CLOCK_STOP: PowerMode = PowerMode::Stop;
}

/// Blocks and unblocks power modes on behalf of drivers.
///
/// Calls are reference counted by the implementation. Every `block` must be
/// paired with exactly one `unblock` of the same mode.
pub trait PowerManager {
    fn block(&self, mode: PowerMode);
    fn unblock(&self, mode: PowerMode);
}

/// Reference-counted power mode blocker.
///
/// Blocking a mode forbids entering it and every deeper mode.
pub struct LayeredPm {
    blockers: Mutex<CriticalSectionRawMutex, [Cell<u8>; PowerMode::COUNT]>,
}

impl LayeredPm {
    pub const fn new() -> Self {
        Self {
            blockers: Mutex::new([Cell::new(0), Cell::new(0), Cell::new(0)]),
        }
    }

    /// Current number of blockers registered for `mode`.
    pub fn blockers(&self, mode: PowerMode) -> u8 {
        self.blockers.lock(|b| b[mode as usize].get())
    }

    /// Deepest mode the idle loop may enter, or `None` if even `Sleep` is
    /// blocked.
    pub fn deepest_allowed(&self) -> Option<PowerMode> {
        self.blockers.lock(|b| {
            let mut allowed = None;
            for mode in PowerMode::ALL {
                if b[mode as usize].get() > 0 {
                    break;
                }
                allowed = Some(mode);
            }
            allowed
        })
    }
}

impl Default for LayeredPm {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerManager for LayeredPm {
    fn block(&self, mode: PowerMode) {
        self.blockers.lock(|b| {
            let count = &b[mode as usize];
            debug_assert!(count.get() < u8::MAX, "too many blockers on {:?}", mode);
            count.set(count.get().saturating_add(1));
        });
    }

    fn unblock(&self, mode: PowerMode) {
        self.blockers.lock(|b| {
            let count = &b[mode as usize];
            debug_assert!(count.get() > 0, "unbalanced unblock of {:?}", mode);
            count.set(count.get().saturating_sub(1));
        });
    }
}

impl<T: PowerManager + ?Sized> PowerManager for &T {
    fn block(&self, mode: PowerMode) {
        (**self).block(mode)
    }

    fn unblock(&self, mode: PowerMode) {
        (**self).unblock(mode)
    }
}
