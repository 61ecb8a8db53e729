use proxtag::core::Config;
use proxtag::radio::proximity::{blink_period, classify, distance};

fn main() {
    let config = Config::default();

    println!("Default configuration:");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize configuration: {}", e),
    }

    println!("\nProximity table:");
    println!("- Caught above {} dBm", config.game.caught_threshold);
    println!("- Safe above {} dBm", config.game.safe_threshold);
    for rssi in [-30i16, -40, -45, -55, -65, -75, -85] {
        println!(
            "  {:>4} dBm: {:?}, ~{:.1} m, blink every {:?}",
            rssi,
            classify(rssi),
            distance(rssi),
            blink_period(Some(rssi))
        );
    }

    println!("\nRoles handed out per game: {:?}", config.rules.roles());
}
