mod gui;

use clap::Parser;
use kinsei::{args::MonitorArgs, dummy_device::DummyDevice, gui::fold_until_stop};
use kinsei::{KinseiClient, Position};

use gui::{engage_gui, Sample};
use log::{error, info, warn};
use std::error::Error;

/// Plot bounds when the device will not say how large the room is.
const FALLBACK_ROOM: (f64, f64) = (10000.0, 10000.0);

/// Polls the device and remembers where each slot last settled.
struct Watch {
    client: KinseiClient,
    required_frames: u32,
    settled: Vec<Position>,
}

impl Watch {
    fn sample(&mut self) -> Sample {
        let raw = self
            .client
            .with_recovery(|c| c.get_persons_positions(true))
            .unwrap_or_default();

        let fired = self.client.stabilize(&raw, self.required_frames);
        if self.settled.len() < fired.len() {
            self.settled.resize(fired.len(), Position::ABSENT);
        }
        for ((slot, out), p) in self.settled.iter_mut().zip(fired).zip(&raw) {
            if p.is_absent() {
                // a slot that emptied has not settled anywhere
                *slot = Position::ABSENT;
            } else if let Some(settled) = out {
                *slot = settled;
            }
        }

        let status = match self.client.get_number_persons_float(true) {
            Some(n) => format!("{:.1} people", n),
            None => "no count".to_owned(),
        };

        Sample {
            raw,
            settled: self.settled.clone(),
            status,
        }
    }
}

fn describe(sample: &Sample) -> Vec<String> {
    let mut lines = vec![format!(" {} ", sample.status), String::new()];
    for (i, p) in sample.raw.iter().enumerate() {
        let settled = sample
            .settled
            .get(i)
            .filter(|s| !s.is_absent())
            .map(|s| format!("settled at {}", s))
            .unwrap_or_default();
        lines.push(format!(" slot {:>2}: {:<16} {}", i, p.to_string(), settled));
    }
    lines
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = MonitorArgs::parse();
    let mut config = args.client_config()?;

    // lives as long as the monitor does
    let _device = match args.dummy {
        Some(persons) => {
            let device = DummyDevice::spawn()?;
            device.set_persons(persons);
            device.set_noise(args.noise);
            let endpoint = device.endpoint();
            config.tracking_host = endpoint.host;
            config.tracking_port = endpoint.port;
            Some(device)
        }
        None => None,
    };

    let mut client = KinseiClient::from_config(&config);
    if !client.is_connected() {
        error!("Could not reach {}", config.tracking_endpoint());
        return Err(format!("no device at {}", config.tracking_endpoint()).into());
    }

    let bounds = match client.get_room_geometry(true) {
        Some(room) => {
            info!(
                "Room is {}x{}mm with {} corners",
                room.width,
                room.height,
                room.corners.len()
            );
            (room.width as f64, room.height as f64)
        }
        None => {
            warn!("Room size unavailable, plotting {:?}", FALLBACK_ROOM);
            FALLBACK_ROOM
        }
    };

    let watch = Watch {
        client,
        required_frames: config.required_frames,
        settled: Vec::new(),
    };

    if args.text {
        let mut watch = fold_until_stop("Monitoring Kinsei device", watch, |mut watch: Watch| {
            let sample = watch.sample();
            let lines = describe(&sample);
            (watch, lines)
        })?;
        watch.client.disconnect();
    } else {
        let mut watch = watch;
        engage_gui(
            Box::new(move || watch.sample()),
            bounds,
            config.tracking_pacing(),
        )?;
    }

    Ok(())
}
