//! BNO055 absolute orientation sensor.
//!
//! Only the parts needed to bring the chip into its fused 9-axis mode and read
//! the quaternion output are implemented. Fusion runs on the chip itself.

use std::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;
use glam::Quat;
use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::bus::RegisterBus;

pub const DEFAULT_ADDR: u8 = 0x28;
pub const CHIP_ID: u8 = 0xA0;

pub mod reg {
    pub const CHIP_ID: u8 = 0x00;
    pub const PAGE_ID: u8 = 0x07;
    pub const QUATERNION_DATA_W_LSB: u8 = 0x20;
    pub const QUATERNION_DATA_Z_MSB: u8 = 0x27;
    pub const OPR_MODE: u8 = 0x3D;
    pub const PWR_MODE: u8 = 0x3E;
    pub const SYS_TRIGGER: u8 = 0x3F;
}

const SYS_TRIGGER_RESET: u8 = 0x20;
const POWER_MODE_NORMAL: u8 = 0x00;

const MODE_SWITCH_MS: u32 = 30;
const RESET_SETTLE_MS: u32 = 50;
const POWER_SETTLE_MS: u32 = 10;
const TRIGGER_SETTLE_MS: u32 = 10;
// the chip needs 20ms on top of the mode switch before fusion output is valid
const FUSION_SETTLE_MS: u32 = MODE_SWITCH_MS + 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationMode {
    Config = 0x00,
    Ndof = 0x0C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    Uninitialized,
    ConfigMode,
    Resetting,
    NormalPower,
    Running,
}

/// How the eight quaternion bytes are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuaternionRead {
    /// One transaction per byte. The device may update its output buffer in
    /// between, so a sample can mix two updates.
    #[default]
    ByteWise,
    /// One auto-incrementing transaction for all eight bytes.
    Burst,
}

/// Bounds the wait for the chip to come back after a soft reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPolicy {
    pub poll_interval_ms: u32,
    pub max_attempts: u32,
}

impl ResetPolicy {
    /// Polls every 10ms until `timeout_ms` has been spent, at least once.
    pub fn with_timeout(timeout_ms: u32) -> Self {
        let poll_interval_ms = 10;
        Self {
            poll_interval_ms,
            max_attempts: (timeout_ms / poll_interval_ms).max(1),
        }
    }
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self::with_timeout(1000)
    }
}

#[derive(Debug, Error)]
pub enum Error<E> {
    #[error("bus transaction failed: {0:?}")]
    Bus(E),
    #[error("device unresponsive: chip id not reported after {attempts} polls")]
    Unresponsive { attempts: u32 },
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: DeviceState, to: DeviceState },
    #[error("device is {0:?}, quaternion output needs Running")]
    NotRunning(DeviceState),
}

/// Maps one raw little-endian register pair onto [-1, 1).
pub fn decode_component(low: u8, high: u8) -> f32 {
    let raw = u16::from(low) | (u16::from(high) << 8);
    (f32::from(raw) - 32768.0) / 32768.0
}

pub struct Bno055<B, D> {
    bus: B,
    delay: D,
    state: DeviceState,
    reset_policy: ResetPolicy,
    read_mode: QuaternionRead,
}

impl<B, D> Bno055<B, D>
where
    B: RegisterBus,
    B::Error: Debug,
    D: DelayMs<u32>,
{
    pub fn new(bus: B, delay: D) -> Self {
        Self {
            bus,
            delay,
            state: DeviceState::Uninitialized,
            reset_policy: ResetPolicy::default(),
            read_mode: QuaternionRead::default(),
        }
    }

    pub fn with_reset_policy(mut self, reset_policy: ResetPolicy) -> Self {
        self.reset_policy = reset_policy;
        self
    }

    pub fn with_read_mode(mut self, read_mode: QuaternionRead) -> Self {
        self.read_mode = read_mode;
        self
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn free(self) -> (B, D) {
        (self.bus, self.delay)
    }

    /// Reads the chip identification register.
    pub fn identify(&mut self) -> Result<u8, Error<B::Error>> {
        self.bus.read_register(reg::CHIP_ID).map_err(Error::Bus)
    }

    /// Resets the chip and brings it into fused 9-axis mode.
    ///
    /// A chip id mismatch before the reset is only logged; the reset wait
    /// afterwards does require the expected id.
    pub fn initialize(&mut self) -> Result<(), Error<B::Error>> {
        if self.state != DeviceState::Uninitialized {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: DeviceState::ConfigMode,
            });
        }

        let id = self.identify()?;
        if id == CHIP_ID {
            info!("bno055 chip id 0x{:02X}", id);
        } else {
            // a wrong id usually means a wrong bus address, but keep going
            warn!(
                "bno055 chip id 0x{:02X} (expected 0x{:02X}), continuing anyway",
                id, CHIP_ID
            );
        }

        self.set_mode(OperationMode::Config)?;
        self.delay.delay_ms(MODE_SWITCH_MS);
        self.transition(DeviceState::ConfigMode)?;

        self.write(reg::SYS_TRIGGER, SYS_TRIGGER_RESET)?;
        self.transition(DeviceState::Resetting)?;
        self.wait_for_reset()?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        self.write(reg::PWR_MODE, POWER_MODE_NORMAL)?;
        self.delay.delay_ms(POWER_SETTLE_MS);
        self.transition(DeviceState::NormalPower)?;

        self.write(reg::PAGE_ID, 0)?;
        self.write(reg::SYS_TRIGGER, 0x00)?;
        self.delay.delay_ms(TRIGGER_SETTLE_MS);

        self.set_mode(OperationMode::Ndof)?;
        self.delay.delay_ms(FUSION_SETTLE_MS);
        self.transition(DeviceState::Running)?;

        info!("bno055 running in ndof mode");
        Ok(())
    }

    /// Reads the fused orientation as (w, x, y, z), W first, low byte first.
    pub fn read_quaternion(&mut self) -> Result<Quat, Error<B::Error>> {
        if self.state != DeviceState::Running {
            return Err(Error::NotRunning(self.state));
        }

        let mut raw = [0u8; 8];
        match self.read_mode {
            QuaternionRead::ByteWise => {
                for (offset, byte) in raw.iter_mut().enumerate() {
                    *byte = self.read(reg::QUATERNION_DATA_W_LSB + offset as u8)?;
                }
            }
            QuaternionRead::Burst => self
                .bus
                .read_registers(reg::QUATERNION_DATA_W_LSB, &mut raw)
                .map_err(Error::Bus)?,
        }

        let w = decode_component(raw[0], raw[1]);
        let x = decode_component(raw[2], raw[3]);
        let y = decode_component(raw[4], raw[5]);
        let z = decode_component(raw[6], raw[7]);
        trace!("quaternion w={:.4} x={:.4} y={:.4} z={:.4}", w, x, y, z);

        Ok(Quat::from_xyzw(x, y, z, w))
    }

    fn wait_for_reset(&mut self) -> Result<(), Error<B::Error>> {
        let ResetPolicy {
            poll_interval_ms,
            max_attempts,
        } = self.reset_policy;

        for attempt in 1..=max_attempts {
            // the chip does not ack while it reboots, so bus errors are expected here
            match self.bus.read_register(reg::CHIP_ID) {
                Ok(CHIP_ID) => {
                    debug!("bno055 back after reset ({} polls)", attempt);
                    return Ok(());
                }
                Ok(id) => trace!("reset poll {}: chip id 0x{:02X}", attempt, id),
                Err(err) => trace!("reset poll {}: {:?}", attempt, err),
            }
            self.delay.delay_ms(poll_interval_ms);
        }

        Err(Error::Unresponsive {
            attempts: max_attempts,
        })
    }

    fn transition(&mut self, to: DeviceState) -> Result<(), Error<B::Error>> {
        if to <= self.state {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }

        debug!("bno055 {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    fn set_mode(&mut self, mode: OperationMode) -> Result<(), Error<B::Error>> {
        self.write(reg::OPR_MODE, mode as u8)
    }

    fn read(&mut self, register: u8) -> Result<u8, Error<B::Error>> {
        self.bus.read_register(register).map_err(Error::Bus)
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), Error<B::Error>> {
        self.bus.write_register(register, value).map_err(Error::Bus)
    }
}
