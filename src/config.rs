use std::{
    fs, io,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    bno055::{self, QuaternionRead, ResetPolicy},
    mpr121::{self, Thresholds},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config contains no combination of port and ip addr that the streamer can send to")]
    NoValidSocketAddrs,
    #[error("failed to resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },
    #[error("0x{0:02X} is not a 7-bit i2c address")]
    InvalidAddress(u8),
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
}

/// Streamer settings, read from a toml file. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub i2c_bus: String,
    pub orientation_address: u8,
    pub touch_enabled: bool,
    pub touch_address: u8,
    pub destination_host: String,
    pub destination_port: u16,
    pub bind_address: String,
    pub touch_threshold: u8,
    pub release_threshold: u8,
    pub orientation_path: String,
    pub touch_path: String,
    pub forward_touch: bool,
    pub sample_interval_ms: Option<u64>,
    pub reset_timeout_ms: u32,
    pub burst_read: bool,
}

impl Default for Config {
    fn default() -> Self {
        let thresholds = Thresholds::default();

        Self {
            i2c_bus: "/dev/i2c-1".into(),
            orientation_address: bno055::DEFAULT_ADDR,
            touch_enabled: true,
            touch_address: mpr121::DEFAULT_ADDR,
            destination_host: "127.0.0.1".into(),
            destination_port: 9000,
            bind_address: "0.0.0.0:0".into(),
            touch_threshold: thresholds.touch,
            release_threshold: thresholds.release,
            orientation_path: "/n/pd/bno".into(),
            touch_path: "/n/pd/touch".into(),
            forward_touch: false,
            sample_interval_ms: None,
            reset_timeout_ms: 1000,
            burst_read: false,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;

        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for addr in [self.orientation_address, self.touch_address] {
            if addr > 0x7F {
                return Err(ConfigError::InvalidAddress(addr));
            }
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))
    }

    /// First address the destination resolves to in the address family of
    /// the bind address.
    pub fn destination(&self) -> Result<SocketAddr, ConfigError> {
        let bind = self.bind_addr()?;
        let mut addrs = (self.destination_host.as_str(), self.destination_port)
            .to_socket_addrs()
            .map_err(|source| ConfigError::Resolve {
                host: self.destination_host.clone(),
                source,
            })?;

        addrs
            .find(|addr| addr.is_ipv4() == bind.is_ipv4())
            .ok_or(ConfigError::NoValidSocketAddrs)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            touch: self.touch_threshold,
            release: self.release_threshold,
        }
    }

    pub fn reset_policy(&self) -> ResetPolicy {
        ResetPolicy::with_timeout(self.reset_timeout_ms)
    }

    pub fn quaternion_read(&self) -> QuaternionRead {
        if self.burst_read {
            QuaternionRead::Burst
        } else {
            QuaternionRead::ByteWise
        }
    }

    pub fn sample_interval(&self) -> Option<Duration> {
        self.sample_interval_ms.map(Duration::from_millis)
    }
}
