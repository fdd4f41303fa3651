//! `embedded-hal-async` view of one bus.
//!
//! Lets off-the-shelf sensor drivers share a bus with code that uses the
//! engine directly. Each `transaction` holds the bus lock from the first
//! START to the final STOP.

use embedded_hal_async::i2c::{ErrorType, I2c as AsyncI2c, Operation, SevenBitAddress};

use super::{BusId, Error, Flags, I2c, Instance};
use crate::power::PowerManager;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

/// Handle to one bus of an [`I2c`], usable by many devices at once.
pub struct I2cDevice<'a, T: Instance, P: PowerManager, const N: usize> {
    i2c: &'a I2c<T, P, N>,
    bus: BusId<N>,
}

impl<'a, T: Instance, P: PowerManager, const N: usize> I2cDevice<'a, T, P, N> {
    pub fn new(i2c: &'a I2c<T, P, N>, bus: BusId<N>) -> Self {
        Self { i2c, bus }
    }
}

impl<T: Instance, P: PowerManager, const N: usize> ErrorType for I2cDevice<'_, T, P, N> {
    type Error = Error;
}

impl<T: Instance, P: PowerManager, const N: usize> AsyncI2c<SevenBitAddress>
    for I2cDevice<'_, T, P, N>
{
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut bus = self.i2c.acquire(self.bus).await;
        let last = operations.len().saturating_sub(1);
        let mut previous = None;

        for i in 0..operations.len() {
            // bytes of the reads directly after this one, clocked as one run
            let following: usize = operations[i + 1..]
                .iter()
                .map_while(|op| match op {
                    Operation::Read(buf) => Some(buf.len()),
                    Operation::Write(_) => None,
                })
                .sum();

            let operation = &mut operations[i];
            let direction = match operation {
                Operation::Read(_) => Direction::Read,
                Operation::Write(_) => Direction::Write,
            };

            let mut flags = Flags::NONE;
            if previous == Some(direction) {
                flags = flags | Flags::NO_START;
            }
            if i != last {
                flags = flags | Flags::NO_STOP;
            }

            match operation {
                Operation::Read(buf) => bus.read_continued(address, buf, flags, following)?,
                Operation::Write(data) => bus.write_bytes(address, data, flags)?,
            };
            previous = Some(direction);
        }

        Ok(())
    }
}
