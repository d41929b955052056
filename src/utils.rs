//! Utility functions for key encoding

use bech32::{Bech32m, Hrp};

pub const PARTY_HRP: &str = "party";

// encode a 16 byte party key as a bech32m string under the `party` hrp
pub fn party_key_to_bech32(key: &[u8; 16]) -> anyhow::Result<String> {
    let hrp = Hrp::parse(PARTY_HRP)?;
    let encode = bech32::encode::<Bech32m>(hrp, key)?;
    Ok(encode)
}

pub fn party_key_from_bech32(encoded: &str) -> anyhow::Result<[u8; 16]> {
    let (hrp, data) = bech32::decode(encoded.trim())?;
    if hrp.as_str() != PARTY_HRP {
        anyhow::bail!("expected hrp '{PARTY_HRP}', found '{}'", hrp.as_str());
    }
    let key: [u8; 16] = data
        .try_into()
        .map_err(|data: Vec<u8>| anyhow::anyhow!("party key must be 16 bytes, found {}", data.len()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_foreign_hrp() {
        let hrp = Hrp::parse("carrier").unwrap();
        let foreign = bech32::encode::<Bech32m>(hrp, &[7u8; 16]).unwrap();

        assert!(party_key_from_bech32(&foreign).is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        let hrp = Hrp::parse(PARTY_HRP).unwrap();
        let short = bech32::encode::<Bech32m>(hrp, &[1u8; 8]).unwrap();

        assert!(party_key_from_bech32(&short).is_err());
    }
}
