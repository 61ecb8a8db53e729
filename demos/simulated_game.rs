//! A full game on the simulated air and the in-process bus: one coordinator,
//! a Runner, a Tagger and a Beacon. The Tagger walks up to the Runner, then
//! the Runner walks over to the Beacon to get saved.

use std::time::Duration;

use proxtag::core::{Config, DeviceIdentity, Rules};
use proxtag::device::{DeviceRunner, LogOutput};
use proxtag::network::MemoryBroker;
use proxtag::radio::SimulatedAir;
use proxtag::session::{NoInput, SessionRunner};
use proxtag::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = Config {
        rules: Rules {
            runners: 1,
            taggers: 1,
            beacons: 1,
            duration_secs: 30,
        },
        tick_interval: Duration::from_millis(20),
        bus: proxtag::core::BusConfig {
            poll_timeout: Duration::from_millis(2),
            ..Default::default()
        },
        ..Config::default()
    };

    let broker = MemoryBroker::new();
    let air = SimulatedAir::with_jitter(2.0, 42)?;

    let mut coordinator = SessionRunner::new(&config, broker.client(), NoInput);
    let names = ["runner01", "tagger01", "beacon01"];
    let positions = [(0.0, 0.0), (8.0, 0.0), (0.0, 8.0)];
    let mut devices = Vec::new();
    let mut radios = Vec::new();
    for (name, position) in names.iter().zip(positions) {
        let radio = air.radio(position)?;
        radios.push(radio.clone());
        devices.push(DeviceRunner::new(
            DeviceIdentity::from_id(*name)?,
            &config,
            broker.client(),
            radio,
            LogOutput::new(*name),
        ));
    }

    // everyone connects and announces
    for _ in 0..5 {
        coordinator.tick().await?;
        for device in devices.iter_mut() {
            device.tick().await?;
        }
    }
    info!("Roster: {:?}", coordinator.coordinator().state().roster);
    coordinator.coordinator_mut().start(proxtag::time::now())?;

    let (runner, tagger) = (&radios[0], &radios[1]);
    for step in 0..400u32 {
        match step {
            // the Tagger closes in
            20..=60 => {
                let x = 8.0 - f64::from(step - 20) * 0.2;
                air.place(tagger, (x.max(0.2), 0.0))?;
            }
            // then backs off while the Runner heads for the Beacon
            120..=200 => {
                air.place(tagger, (8.0, 0.0))?;
                let y = f64::from(step - 120) * 0.1;
                air.place(runner, (0.0, y.min(7.8)))?;
            }
            _ => {}
        }

        coordinator.tick().await?;
        for device in devices.iter_mut() {
            device.tick().await?;
        }
        if !coordinator.coordinator().is_active() {
            break;
        }
        tokio::time::sleep(config.tick_interval).await;
    }

    for device in &devices {
        info!(
            "{}: {:?}",
            device.machine().identity(),
            device.machine().state()
        );
    }
    info!("{}", coordinator.coordinator().status(proxtag::time::now()));
    coordinator.coordinator_mut().end()?;
    coordinator.tick().await?;
    Ok(())
}
