//! Static bus configuration.

/// Bus speed class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    /// 10 kbit/s
    Low,
    /// 100 kbit/s
    #[default]
    Normal,
    /// 400 kbit/s
    Fast,
}

impl Speed {
    /// Clock control register value for a peripheral clocked at `clk_hz`.
    pub const fn ccr(self, clk_hz: u32) -> u16 {
        let ccr = match self {
            Speed::Low => clk_hz / 20_000,
            Speed::Normal => clk_hz / 200_000,
            Speed::Fast => clk_hz / 800_000,
        };
        ccr as u16
    }
}

/// Configuration of one bus, as provided by the board.
pub struct BusConfig<T> {
    /// Controller instance.
    pub instance: T,
    /// Input clock of the controller in Hz.
    pub clk_hz: u32,
    pub speed: Speed,
}

impl<T> BusConfig<T> {
    pub const fn new(instance: T, clk_hz: u32, speed: Speed) -> Self {
        Self {
            instance,
            clk_hz,
            speed,
        }
    }

    /// CR2 frequency field: input clock in MHz.
    pub const fn freq_mhz(&self) -> u16 {
        (self.clk_hz / 1_000_000) as u16
    }

    /// Maximum rise time register value.
    pub const fn trise(&self) -> u16 {
        self.freq_mhz() + 1
    }

    pub const fn ccr(&self) -> u16 {
        self.speed.ccr(self.clk_hz)
    }
}
