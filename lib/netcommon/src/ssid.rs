//! Deterministic hotspot SSID generation (§4.1).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Seeds a deterministic PRNG with `seed` and appends four characters drawn
/// from the 32-character alphabet (`A-Z` minus `{I,O}` plus `2-9`) to
/// `prefix`, e.g. `generate("NextUI-", 42) == "NextUI-Q7K4"`-shaped output.
pub fn generate(prefix: &str, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ssid = String::with_capacity(prefix.len() + 4);
    ssid.push_str(prefix);

    for _ in 0..4 {
        let idx = rng.gen_range(0..ALPHABET.len());
        ssid.push(ALPHABET[idx] as char);
    }

    ssid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_seed() {
        assert_eq!(generate("NextUI-", 7), generate("NextUI-", 7));
    }

    #[test]
    fn differs_across_seeds_in_general() {
        assert_ne!(generate("NextUI-", 1), generate("NextUI-", 2));
    }

    #[test]
    fn four_chars_from_restricted_alphabet() {
        let ssid = generate("NextUI-", 99);
        let suffix = &ssid[ssid.len() - 4..];
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| ALPHABET.contains(&(c as u8))));
    }
}
