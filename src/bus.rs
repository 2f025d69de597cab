use std::fmt::Debug;

use embedded_hal::blocking::i2c::{Write, WriteRead};
use linux_embedded_hal::{i2cdev::linux::LinuxI2CError, I2cdev};

/// Single-byte register access to one device on a bus.
///
/// Drivers only ever see this trait, so the same driver code runs against
/// `/dev/i2c-N` on the board and against a scripted stub in tests.
pub trait RegisterBus {
    type Error: Debug;

    fn read_register(&mut self, register: u8) -> Result<u8, Self::Error>;

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Self::Error>;

    /// Reads `buf.len()` consecutive registers starting at `start`.
    ///
    /// The default issues one single-byte read per register, lowest address
    /// first, so the result is not atomic. Transports that can burst read
    /// override this with a single transaction.
    fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        for (offset, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_register(start.wrapping_add(offset as u8))?;
        }

        Ok(())
    }
}

/// A blocking i2c bus bound to a single 7-bit slave address.
pub struct I2cRegisterBus<I2C> {
    i2c: I2C,
    addr: u8,
}

impl<I2C> I2cRegisterBus<I2C> {
    pub fn new(i2c: I2C, addr: u8) -> Self {
        Self { i2c, addr }
    }

    pub fn addr(&self) -> u8 {
        self.addr
    }

    pub fn free(self) -> I2C {
        self.i2c
    }
}

impl I2cRegisterBus<I2cdev> {
    /// Opens a linux i2c character device (e.g. `/dev/i2c-1`) for `addr`.
    pub fn open(path: &str, addr: u8) -> Result<Self, LinuxI2CError> {
        Ok(Self::new(I2cdev::new(path)?, addr))
    }
}

impl<I2C, E> RegisterBus for I2cRegisterBus<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>,
    E: Debug,
{
    type Error = E;

    fn read_register(&mut self, register: u8) -> Result<u8, E> {
        let mut value = [0u8; 1];
        self.i2c.write_read(self.addr, &[register], &mut value)?;
        Ok(value[0])
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), E> {
        self.i2c.write(self.addr, &[register, value])
    }

    fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), E> {
        // register auto-increment on the device turns this into one transaction
        self.i2c.write_read(self.addr, &[start], buf)
    }
}
