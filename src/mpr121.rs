//! MPR121 12-channel capacitive touch controller.

use std::fmt::Debug;

use log::{debug, info};
use thiserror::Error;

use crate::bus::RegisterBus;

pub const DEFAULT_ADDR: u8 = 0x5A;
pub const CHANNELS: u8 = 12;

pub mod reg {
    pub const TOUCH_STATUS_L: u8 = 0x00;
    pub const TOUCH_STATUS_H: u8 = 0x01;
    pub const MHDR: u8 = 0x2B;
    pub const NHDR: u8 = 0x2C;
    pub const NCLR: u8 = 0x2D;
    pub const FDLR: u8 = 0x2E;
    pub const MHDF: u8 = 0x2F;
    pub const NHDF: u8 = 0x30;
    pub const NCLF: u8 = 0x31;
    pub const FDLF: u8 = 0x32;
    pub const NHDT: u8 = 0x33;
    pub const NCLT: u8 = 0x34;
    pub const FDLT: u8 = 0x35;
    pub const TOUCH_THRESHOLD_0: u8 = 0x41;
    pub const RELEASE_THRESHOLD_0: u8 = 0x42;
    pub const DEBOUNCE: u8 = 0x5B;
    pub const CONFIG1: u8 = 0x5C;
    pub const CONFIG2: u8 = 0x5D;
    pub const ECR: u8 = 0x5E;
    pub const SOFT_RESET: u8 = 0x80;
}

const SOFT_RESET_COMMAND: u8 = 0x63;
/// Baseline tracking on (first 5 bits), all 12 electrodes enabled.
const ECR_RUN_ALL: u8 = 0x8F;
const ECR_STOP: u8 = 0x00;

/// Baseline filter and analog front end settings written during init.
const TUNING: [(u8, u8); 14] = [
    (reg::MHDR, 0x01),
    (reg::NHDR, 0x01),
    (reg::NCLR, 0x0E),
    (reg::FDLR, 0x00),
    (reg::MHDF, 0x01),
    (reg::NHDF, 0x05),
    (reg::NCLF, 0x01),
    (reg::FDLF, 0x00),
    (reg::NHDT, 0x00),
    (reg::NCLT, 0x00),
    (reg::FDLT, 0x00),
    (reg::DEBOUNCE, 0x00),
    // 16uA charge current
    (reg::CONFIG1, 0x10),
    // 0.5us encoding, 1ms period
    (reg::CONFIG2, 0x20),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub touch: u8,
    pub release: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            touch: 12,
            release: 6,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error<E> {
    #[error("bus transaction failed: {0:?}")]
    Bus(E),
    #[error("channel {0} out of range (0..12)")]
    InvalidChannel(u8),
    #[error("mpr121 has not been initialized")]
    NotInitialized,
}

/// Touched channels, one bit per electrode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TouchState(u16);

impl TouchState {
    pub fn from_bits(bits: u16) -> Self {
        Self(bits & 0x0FFF)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn is_touched(&self, channel: u8) -> bool {
        channel < CHANNELS && self.0 & (1 << channel) != 0
    }

    pub fn touched(&self) -> impl Iterator<Item = u8> + '_ {
        (0..CHANNELS).filter(move |&channel| self.is_touched(channel))
    }
}

pub struct Mpr121<B> {
    bus: B,
    thresholds: Thresholds,
    initialized: bool,
}

impl<B> Mpr121<B>
where
    B: RegisterBus,
    B::Error: Debug,
{
    pub fn new(bus: B, thresholds: Thresholds) -> Self {
        Self {
            bus,
            thresholds,
            initialized: false,
        }
    }

    /// True once `initialize` has enabled the electrodes.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn free(self) -> B {
        self.bus
    }

    /// Resets the controller, configures every channel and enables it.
    ///
    /// ECR must be written last: the chip only accepts configuration writes
    /// while all electrodes are stopped.
    pub fn initialize(&mut self) -> Result<(), Error<B::Error>> {
        self.initialized = false;
        self.write(reg::SOFT_RESET, SOFT_RESET_COMMAND)?;
        self.write(reg::ECR, ECR_STOP)?;

        let Thresholds { touch, release } = self.thresholds;
        for channel in 0..CHANNELS {
            self.set_thresholds(channel, touch, release)?;
        }

        for (register, value) in TUNING {
            self.write(register, value)?;
        }

        self.write(reg::ECR, ECR_RUN_ALL)?;
        self.initialized = true;

        info!("mpr121 running, thresholds touch={} release={}", touch, release);
        Ok(())
    }

    pub fn set_thresholds(
        &mut self,
        channel: u8,
        touch: u8,
        release: u8,
    ) -> Result<(), Error<B::Error>> {
        if channel >= CHANNELS {
            return Err(Error::InvalidChannel(channel));
        }

        debug!("mpr121 channel {} touch={} release={}", channel, touch, release);
        self.write(reg::TOUCH_THRESHOLD_0 + 2 * channel, touch)?;
        self.write(reg::RELEASE_THRESHOLD_0 + 2 * channel, release)
    }

    /// Channels 0-7 from the low status register.
    pub fn read_touch_mask(&mut self) -> Result<u8, Error<B::Error>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        self.bus.read_register(reg::TOUCH_STATUS_L).map_err(Error::Bus)
    }

    /// All 12 channels, from both status registers.
    pub fn read_touch_state(&mut self) -> Result<TouchState, Error<B::Error>> {
        let low = self.read_touch_mask()?;
        let high = self
            .bus
            .read_register(reg::TOUCH_STATUS_H)
            .map_err(Error::Bus)?;

        Ok(TouchState::from_bits(u16::from(low) | (u16::from(high) << 8)))
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), Error<B::Error>> {
        self.bus.write_register(register, value).map_err(Error::Bus)
    }
}
