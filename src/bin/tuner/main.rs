use clap::Parser;
use kinsei::args::{FileCommand, GetCommand, SetCommand, TunerArgs, TunerTask};
use kinsei::{KinseiTuner, RonFile, TuningConfiguration, TuningParameter};

use log::{error, info};
use std::error::Error;

/// Turns the tuner's last failure into an error for `main`.
fn failure(tuner: &KinseiTuner, what: &str) -> Box<dyn Error> {
    match tuner.last_error() {
        Some(e) => format!("{}: {}", what, e).into(),
        None => format!("{}: the device did not confirm", what).into(),
    }
}

fn confirm(tuner: &KinseiTuner, done: bool, what: &str) -> Result<(), Box<dyn Error>> {
    if done {
        println!("{}: done", what);
        Ok(())
    } else {
        Err(failure(tuner, what))
    }
}

fn print_configuration(config: &TuningConfiguration) {
    for param in TuningParameter::ALL {
        println!("{:?} = {}", param, config.get(param));
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = TunerArgs::parse();
    let config = args.connection.tuning_config()?;

    let mut tuner = KinseiTuner::from_config(&config);
    if !tuner.is_connected() {
        error!("Could not reach {}", config.tuning_endpoint());
        return Err(format!("no device at {}", config.tuning_endpoint()).into());
    }

    match args.command {
        TunerTask::Get(GetCommand { param: Some(name) }) => {
            let param = TuningParameter::from(name);
            match tuner.get(param, true) {
                Some(value) => println!("{:?} = {}", param, value),
                None => return Err(failure(&tuner, "get")),
            }
        }
        TunerTask::Get(GetCommand { param: None }) => {
            let current = tuner
                .read_full_configuration()
                .ok_or_else(|| failure(&tuner, "get"))?;
            print_configuration(&current);
        }
        TunerTask::Set(SetCommand { param, value }) => {
            let param = TuningParameter::from(param);
            let echoed = tuner.set(param, value, true)?;
            confirm(&tuner, echoed, &format!("set {:?} to {}", param, value))?;
        }
        TunerTask::ResetBackground => {
            let done = tuner.reset_background(true);
            confirm(&tuner, done, "reset background")?;
        }
        TunerTask::ResetOffset => {
            let done = tuner.reset_offset(true);
            confirm(&tuner, done, "reset offset")?;
        }
        TunerTask::SaveOverride => {
            let done = tuner.save_override();
            confirm(&tuner, done, "save override")?;
        }
        TunerTask::RemoveOverride => {
            let done = tuner.remove_override();
            confirm(&tuner, done, "remove override")?;
        }
        TunerTask::Dump(FileCommand { file }) => {
            let current = tuner
                .read_full_configuration()
                .ok_or_else(|| failure(&tuner, "dump"))?;
            current.to_path(&file)?;
            info!("Saved tuning configuration to {}", file.display());
            print_configuration(&current);
        }
        TunerTask::Load(FileCommand { file }) => {
            let wanted = TuningConfiguration::from_path(&file)?;
            let done = tuner.write_full_configuration(&wanted);
            confirm(&tuner, done, &format!("load {}", file.display()))?;
        }
    }

    tuner.disconnect();
    Ok(())
}
