//! Command line reader for DHT sensors on sysfs GPIO lines.
//!
//! ```bash
//! # Read a DHT22 on line 4 with real-time priority
//! dht-read --pin 4 --boost
//!
//! # Print the raw pulse train instead of decoding it
//! dht-read --pin 4 --raw
//!
//! # Blink a LED on line 17 five times to check the wiring
//! dht-read --pin 17 --blink 5
//! ```

use std::process;

use clap::{Parser, ValueEnum};
use dht_sysfs::{Dht, SensorType};
use log::{error, info};

/// Read temperature and humidity from a DHT11/DHT22 sensor
#[derive(Parser, Debug)]
#[command(name = "dht-read")]
#[command(version, about, long_about = None)]
struct Args {
    /// GPIO line number the sensor data pin is attached to
    #[arg(short, long)]
    pin: u32,

    /// Sensor model
    #[arg(short, long, value_enum, default_value_t = Sensor::Dht22)]
    sensor: Sensor,

    /// Capture under real-time scheduling priority
    #[arg(short, long)]
    boost: bool,

    /// Additional attempts after a failed read
    #[arg(short, long, default_value_t = 3)]
    retries: u32,

    /// Print the captured pulse train as level/duration pairs
    #[arg(long, conflicts_with = "blink")]
    raw: bool,

    /// Toggle the line N times instead of reading
    #[arg(long, value_name = "N")]
    blink: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sensor {
    Dht11,
    Dht22,
    Am2302,
}

impl From<Sensor> for SensorType {
    fn from(sensor: Sensor) -> Self {
        match sensor {
            Sensor::Dht11 => SensorType::Dht11,
            Sensor::Dht22 => SensorType::Dht22,
            Sensor::Am2302 => SensorType::AM2302,
        }
    }
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut dht = Dht::sysfs();

    if let Some(times) = args.blink {
        if let Err(err) = dht.blink(args.pin, times) {
            error!("blink on line {} failed: {err}", args.pin);
            process::exit(1);
        }
        return;
    }

    if args.raw {
        match dht.dial(args.pin, args.boost) {
            Ok(train) => {
                let flat: Vec<String> = train.to_flat().iter().map(u32::to_string).collect();
                println!("{}", flat.join(" "));
            }
            Err(err) => {
                error!("dial on line {} failed: {err}", args.pin);
                process::exit(1);
            }
        }
        return;
    }

    let sensor = SensorType::from(args.sensor);
    match dht.read_with_retry(sensor, args.pin, args.boost, args.retries) {
        Ok((reading, retried)) => {
            if retried > 0 {
                info!("{sensor} answered after {retried} failed attempts");
            }
            println!(
                "Temp={:.1}*C  Humidity={:.1}%",
                reading.temperature, reading.relative_humidity
            );
        }
        Err(err) => {
            error!("failed to read {sensor} on line {}: {err}", args.pin);
            process::exit(1);
        }
    }
}
