use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use linux_embedded_hal::{Delay, I2cdev};
use log::{info, warn};

use oscstreamer::{
    bno055::Bno055,
    bus::I2cRegisterBus,
    config::Config,
    mpr121::Mpr121,
    sink::UdpSink,
    streamer::{CancellationToken, Settings, Streamer},
};

/// Streams sensor orientation from i2c to an OSC receiver.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// toml config file, defaults are used for anything it leaves out
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// destination as host:port, overrides the config file
    #[arg(short, long)]
    destination: Option<String>,

    /// also send the touch mask
    #[arg(long)]
    forward_touch: bool,

    /// run without the touch controller
    #[arg(long)]
    no_touch: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(destination) = &args.destination {
        let Some((host, port)) = destination.rsplit_once(':') else {
            bail!("destination '{}' is not host:port", destination);
        };
        config.destination_host = host.trim_matches(|c| c == '[' || c == ']').into();
        config.destination_port = port
            .parse()
            .with_context(|| format!("invalid port in '{}'", destination))?;
    }
    config.forward_touch |= args.forward_touch;
    config.touch_enabled &= !args.no_touch;

    config.validate()?;
    Ok(config)
}

fn open_touch(config: &Config) -> Result<Mpr121<I2cRegisterBus<I2cdev>>> {
    let bus = I2cRegisterBus::open(&config.i2c_bus, config.touch_address)
        .with_context(|| format!("error init i2c at 0x{:02x}", config.touch_address))?;
    let mut mpr = Mpr121::new(bus, config.thresholds());
    mpr.initialize().context("mpr121 initialization failed")?;

    Ok(mpr)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let bind = config.bind_addr()?;
    let destination = config.destination()?;

    let bus = I2cRegisterBus::open(&config.i2c_bus, config.orientation_address)
        .with_context(|| format!("error init i2c at 0x{:02x}", config.orientation_address))?;
    info!("i2c init at 0x{:02x} on {} OK", bus.addr(), config.i2c_bus);

    let mut bno = Bno055::new(bus, Delay)
        .with_reset_policy(config.reset_policy())
        .with_read_mode(config.quaternion_read());
    bno.initialize().context("bno055 initialization failed")?;

    // orientation alone is still useful, so a missing touch controller is not fatal
    let touch = if config.touch_enabled {
        match open_touch(&config) {
            Ok(mpr) => Some(mpr),
            Err(err) => {
                warn!("continuing without touch: {:#}", err);
                None
            }
        }
    } else {
        None
    };

    let sink = UdpSink::connect(bind, destination)
        .with_context(|| format!("failed to open udp socket to {}", destination))?;
    info!("sending to {}", sink.destination());

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || token.cancel())
            .context("failed to install Ctrl-C handler")?;
    }

    let mut streamer = Streamer::new(bno, touch, sink, Settings::from(&config))?;
    streamer.run(&token);

    Ok(())
}
