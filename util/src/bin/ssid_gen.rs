//! Prints the hotspot SSID a given prefix/seed pair would produce, so a
//! host and a client can be checked against each other by hand without
//! starting a full session (§9a.5).

use clap::{App, Arg};

fn main() {
    let matches = App::new("SSID Generator")
        .version("1.0")
        .author("NextUI Contributors")
        .about("Derives a hotspot SSID from a prefix and seed")
        .arg(Arg::with_name("PREFIX").long("prefix").takes_value(true).help("SSID prefix, defaults to the NextUI hotspot prefix"))
        .arg(Arg::with_name("SEED").long("seed").takes_value(true).required(true).help("Seed, e.g. the game CRC"))
        .get_matches();

    let prefix = matches.value_of("PREFIX").unwrap_or(netcommon::HOTSPOT_SSID_PREFIX);
    let seed: u64 = matches
        .value_of("SEED")
        .unwrap()
        .parse()
        .expect("SEED must be a u64");

    println!("{}", netcommon::ssid::generate(prefix, seed));
}
