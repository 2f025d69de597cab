//! Streams the orientation of a BNO055 (and optionally the touch state of an
//! MPR121) from a linux i2c bus to an OSC receiver over udp.

pub mod bno055;
pub mod bus;
pub mod config;
pub mod euler;
pub mod mpr121;
pub mod osc;
pub mod sink;
pub mod streamer;
