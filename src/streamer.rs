use std::{
    fmt::Debug,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info, log_enabled, trace, warn, Level};
use thiserror::Error;

use crate::{
    bno055::{Bno055, DeviceState},
    bus::RegisterBus,
    config::Config,
    euler::{to_euler, EulerAngles},
    mpr121::Mpr121,
    osc::{self, Message},
    sink::DatagramSink,
};

/// Fixed point scale of the angles sent on the wire (hundredths of a degree).
pub const ANGLE_SCALE: f32 = 100.0;

const BUFFER_SIZE: usize = 256;

/// Shared stop flag for the sampling loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub orientation_path: String,
    pub touch_path: String,
    pub forward_touch: bool,
    pub sample_interval: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            orientation_path: config.orientation_path.clone(),
            touch_path: config.touch_path.clone(),
            forward_touch: config.forward_touch,
            sample_interval: config.sample_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub samples: u64,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Error)]
pub enum StreamerError {
    #[error("orientation sensor is {0:?}, streaming needs Running")]
    NotReady(DeviceState),
    #[error("touch controller has not been initialized")]
    TouchNotReady,
}

/// `[roll, pitch, yaw]` in hundredths of a degree as three ints.
pub fn orientation_message(address: &str, angles: &EulerAngles) -> Message {
    let [roll, pitch, yaw] = angles.scaled_ints(ANGLE_SCALE);
    Message::new(address)
        .with_int(roll)
        .with_int(pitch)
        .with_int(yaw)
}

pub fn touch_message(address: &str, mask: u8) -> Message {
    Message::new(address).with_int(i32::from(mask))
}

/// Owns the sensors and the sink and moves samples from one to the other.
pub struct Streamer<OB, D, TB, S> {
    orientation: Bno055<OB, D>,
    touch: Option<Mpr121<TB>>,
    sink: S,
    settings: Settings,
    buffer: [u8; BUFFER_SIZE],
    stats: Stats,
    last_touch: Option<u8>,
}

impl<OB, D, TB, S> Streamer<OB, D, TB, S>
where
    OB: RegisterBus,
    OB::Error: Debug,
    D: DelayMs<u32>,
    TB: RegisterBus,
    TB::Error: Debug,
    S: DatagramSink,
{
    /// Both drivers must already be initialized.
    pub fn new(
        orientation: Bno055<OB, D>,
        touch: Option<Mpr121<TB>>,
        sink: S,
        settings: Settings,
    ) -> Result<Self, StreamerError> {
        if orientation.state() != DeviceState::Running {
            return Err(StreamerError::NotReady(orientation.state()));
        }
        if touch.as_ref().map_or(false, |mpr| !mpr.is_initialized()) {
            return Err(StreamerError::TouchNotReady);
        }

        Ok(Self {
            orientation,
            touch,
            sink,
            settings,
            buffer: [0; BUFFER_SIZE],
            stats: Stats::default(),
            last_touch: None,
        })
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn last_touch(&self) -> Option<u8> {
        self.last_touch
    }

    /// Samples until `token` is cancelled.
    pub fn run(&mut self, token: &CancellationToken) -> Stats {
        info!(
            "streaming {} (touch: {}, forwarded: {})",
            self.settings.orientation_path,
            self.touch.is_some(),
            self.settings.forward_touch
        );

        while !token.is_cancelled() {
            let started = Instant::now();
            self.step();

            if let Some(rest) = self
                .settings
                .sample_interval
                .and_then(|interval| interval.checked_sub(started.elapsed()))
            {
                thread::sleep(rest);
            }
        }

        info!(
            "stopped after {} samples ({} sent, {} dropped)",
            self.stats.samples, self.stats.sent, self.stats.dropped
        );
        self.stats
    }

    /// One sample. Failures are logged and counted, never returned, so a bad
    /// read or send only costs the message it affects.
    pub fn step(&mut self) {
        self.stats.samples += 1;

        match self.orientation.read_quaternion() {
            Ok(q) => {
                let angles = to_euler(q);
                trace!(
                    "roll = {:7.2}, pitch = {:7.2}, yaw = {:7.2}",
                    angles.roll,
                    angles.pitch,
                    angles.yaw
                );
                let message = orientation_message(&self.settings.orientation_path, &angles);
                self.send(&message);
            }
            Err(err) => {
                warn!("orientation read failed: {}", err);
                self.stats.dropped += 1;
            }
        }

        let mask = match self.touch.as_mut().map(Mpr121::read_touch_mask) {
            None => return,
            Some(Ok(mask)) => mask,
            Some(Err(err)) => {
                warn!("touch read failed: {}", err);
                self.stats.dropped += 1;
                return;
            }
        };

        if self.last_touch != Some(mask) {
            debug!("touch mask {:08b}", mask);
        }
        self.last_touch = Some(mask);

        if self.settings.forward_touch {
            let message = touch_message(&self.settings.touch_path, mask);
            self.send(&message);
        }
    }

    fn send(&mut self, message: &Message) {
        let len = match message.encode_into(&mut self.buffer) {
            Ok(len) => len,
            Err(err) => {
                warn!("dropping {}: {}", message.address, err);
                self.stats.dropped += 1;
                return;
            }
        };

        if log_enabled!(Level::Trace) {
            trace!("{}\n{}", message, osc::hex_dump(&self.buffer[..len]));
        }

        match self.sink.send(&self.buffer[..len]) {
            Ok(_) => self.stats.sent += 1,
            Err(err) => {
                if err.kind() == io::ErrorKind::WouldBlock {
                    debug!("send of {} would block", message.address);
                } else {
                    warn!("send of {} failed: {}", message.address, err);
                }
                self.stats.dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;
    use crate::{
        bno055::reg as bno_reg,
        bus::mock::{NoopDelay, ScriptedBus, Transaction},
        mpr121::{reg as mpr_reg, Thresholds},
        osc::{decode, Arg},
        sink::mock::RecordingSink,
    };

    type TestStreamer<'a> = Streamer<ScriptedBus, NoopDelay, ScriptedBus, &'a mut RecordingSink>;

    /// Orientation bus that reads back w ~ 1, x = y = z = 0 forever.
    fn level_bus() -> ScriptedBus {
        let mut bus = ScriptedBus::new();
        bus.preset(bno_reg::CHIP_ID, 0xA0);
        bus.preset(0x20, 0xFF).preset(0x21, 0xFF);
        for lsb in [0x22, 0x24, 0x26] {
            bus.preset(lsb, 0x00).preset(lsb + 1, 0x80);
        }
        bus
    }

    fn orientation(bus: ScriptedBus) -> Bno055<ScriptedBus, NoopDelay> {
        let mut bno = Bno055::new(bus, NoopDelay::default());
        bno.initialize().unwrap();
        bno
    }

    fn touch(mask: u8) -> Mpr121<ScriptedBus> {
        let mut mpr = Mpr121::new(ScriptedBus::new(), Thresholds::default());
        mpr.initialize().unwrap();
        mpr.bus_mut().preset(mpr_reg::TOUCH_STATUS_L, mask);
        mpr
    }

    fn streamer<'a>(
        touch: Option<Mpr121<ScriptedBus>>,
        sink: &'a mut RecordingSink,
        settings: Settings,
    ) -> TestStreamer<'a> {
        Streamer::new(orientation(level_bus()), touch, sink, settings).unwrap()
    }

    #[test]
    fn level_sensor_streams_zero_angles() {
        let mut sink = RecordingSink::default();
        let stats = {
            let mut streamer = streamer(None, &mut sink, Settings::default());
            streamer.step();
            streamer.step();
            streamer.stats()
        };

        assert_eq!(
            stats,
            Stats {
                samples: 2,
                sent: 2,
                dropped: 0
            }
        );
        assert_eq!(sink.sent.len(), 2);
        for bytes in &sink.sent {
            let message = decode(bytes).unwrap();
            assert_eq!(message.address, "/n/pd/bno");
            assert_eq!(message.type_tags(), "iii");
            assert_eq!(message.args, vec![Arg::Int(0), Arg::Int(0), Arg::Int(0)]);
        }
    }

    #[test]
    fn orientation_message_truncates_hundredths() {
        let angles = EulerAngles {
            roll: 12.345,
            pitch: -0.5,
            yaw: 179.999,
        };
        let message = orientation_message("/n/pd/bno", &angles);
        assert_eq!(
            message.args,
            vec![Arg::Int(1234), Arg::Int(-50), Arg::Int(17999)]
        );
    }

    #[test]
    fn touch_is_read_but_not_forwarded_by_default() {
        let mut sink = RecordingSink::default();
        let last_touch = {
            let mut streamer = streamer(Some(touch(0b101)), &mut sink, Settings::default());
            streamer.step();
            streamer.last_touch()
        };

        assert_eq!(last_touch, Some(0b101));
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(decode(&sink.sent[0]).unwrap().address, "/n/pd/bno");
    }

    #[test]
    fn touch_forwarded_when_enabled() {
        let mut sink = RecordingSink::default();
        let settings = Settings {
            forward_touch: true,
            ..Settings::default()
        };
        {
            let mut streamer = streamer(Some(touch(0b1000_0001)), &mut sink, settings);
            streamer.step();
        }

        assert_eq!(sink.sent.len(), 2);
        let message = decode(&sink.sent[1]).unwrap();
        assert_eq!(message.address, "/n/pd/touch");
        assert_eq!(message.args, vec![Arg::Int(0b1000_0001)]);
    }

    #[test]
    fn bus_failure_skips_only_that_sample() {
        let mut sink = RecordingSink::default();
        let stats = {
            let mut streamer = streamer(None, &mut sink, Settings::default());
            streamer.orientation.bus_mut().fail(0x23);
            streamer.step();
            streamer.orientation.bus_mut().heal(0x23);
            streamer.step();
            streamer.stats()
        };

        assert_eq!(
            stats,
            Stats {
                samples: 2,
                sent: 1,
                dropped: 1
            }
        );
        assert_eq!(sink.sent.len(), 1);
    }

    #[test]
    fn touch_failure_does_not_stop_orientation() {
        let mut sink = RecordingSink::default();
        let mut mpr = touch(0);
        mpr.bus_mut().fail(mpr_reg::TOUCH_STATUS_L);
        let stats = {
            let mut streamer = streamer(Some(mpr), &mut sink, Settings::default());
            streamer.step();
            streamer.stats()
        };

        assert_eq!(stats.sent, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn send_errors_are_dropped_and_streaming_continues() {
        let mut sink = RecordingSink::default();
        sink.errors.push_back(ErrorKind::WouldBlock);
        sink.errors.push_back(ErrorKind::ConnectionRefused);
        let stats = {
            let mut streamer = streamer(None, &mut sink, Settings::default());
            for _ in 0..3 {
                streamer.step();
            }
            streamer.stats()
        };

        assert_eq!(
            stats,
            Stats {
                samples: 3,
                sent: 1,
                dropped: 2
            }
        );
        assert_eq!(sink.sent.len(), 1);
    }

    #[test]
    fn encode_failure_skips_send() {
        let mut sink = RecordingSink::default();
        let settings = Settings {
            orientation_path: "no-leading-slash".into(),
            ..Settings::default()
        };
        let stats = {
            let mut streamer = streamer(None, &mut sink, settings);
            streamer.step();
            streamer.stats()
        };

        assert_eq!(stats.dropped, 1);
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn uninitialized_sensor_is_rejected() {
        let mut sink = RecordingSink::default();
        let bno = Bno055::new(level_bus(), NoopDelay::default());
        let result: Result<TestStreamer<'_>, _> =
            Streamer::new(bno, None, &mut sink, Settings::default());

        assert!(matches!(
            result,
            Err(StreamerError::NotReady(DeviceState::Uninitialized))
        ));
    }

    #[test]
    fn uninitialized_touch_controller_is_rejected() {
        let mut sink = RecordingSink::default();
        let mut bus = ScriptedBus::new();
        bus.preset(mpr_reg::TOUCH_STATUS_L, 0b11);
        let mpr = Mpr121::new(bus, Thresholds::default());
        let settings = Settings {
            forward_touch: true,
            ..Settings::default()
        };
        let result: Result<TestStreamer<'_>, _> =
            Streamer::new(orientation(level_bus()), Some(mpr), &mut sink, settings);

        assert!(matches!(result, Err(StreamerError::TouchNotReady)));
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn quaternion_is_only_read_after_fusion_mode_is_set() {
        let mut sink = RecordingSink::default();
        let log = {
            let mut streamer = streamer(None, &mut sink, Settings::default());
            streamer.step();
            streamer.orientation.bus_mut().log().to_vec()
        };

        let fusion_set = log
            .iter()
            .position(|t| *t == Transaction::Write(bno_reg::OPR_MODE, 0x0C))
            .unwrap();
        let first_quaternion_read = log
            .iter()
            .position(|t| *t == Transaction::Read(bno_reg::QUATERNION_DATA_W_LSB))
            .unwrap();
        assert_eq!(fusion_set, log.len() - 9);
        assert!(first_quaternion_read > fusion_set);
    }

    #[test]
    fn cancelled_token_stops_before_first_sample() {
        let mut sink = RecordingSink::default();
        let token = CancellationToken::new();
        token.cancel();

        let stats = streamer(None, &mut sink, Settings::default()).run(&token);
        assert_eq!(stats, Stats::default());
    }

    #[test]
    fn run_stops_when_cancelled_from_another_thread() {
        let mut sink = RecordingSink::default();
        let settings = Settings {
            sample_interval: Some(Duration::from_millis(1)),
            ..Settings::default()
        };
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                token.cancel();
            })
        };
        let stats = streamer(None, &mut sink, settings).run(&token);
        canceller.join().unwrap();

        assert!(stats.samples > 0);
        assert_eq!(stats.sent, stats.samples);
        assert_eq!(sink.sent.len() as u64, stats.sent);
    }
}
