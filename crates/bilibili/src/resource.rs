//! User-facing identifiers and the av/BV conversion.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{ApiError, Result};

static NUMERIC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(av|ep|ss|md)(\d+)$").unwrap());

static BV_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^bv([0-9A-Za-z]{10})$").unwrap());

const XOR_CODE: u64 = 23442827791579;
const MASK_CODE: u64 = 2251799813685247;
const MAX_AID: u64 = 1 << 51;
const BASE: u64 = 58;
const ALPHABET: &[u8; 58] = b"FcwAPNKTMug3GV5Lj7EJnHpWsx4tb8haYeviqBz6rkCy12mUSDQX9RdoZf";

/// One of the five identifier schemes accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceIdentifier {
    /// `av170001`
    Avid(u64),
    /// `BV17x411w7KC`, stored with an upper-case `BV` prefix
    Bvid(String),
    /// Single episode, `ep12345`
    Epid(u64),
    /// Season, `ss12345`
    Ssid(u64),
    /// Media title, `md12345`
    Mdid(u64),
}

impl ResourceIdentifier {
    pub fn parse(input: &str) -> Result<Self> {
        input.parse()
    }

    /// Whether this scheme may resolve to more than one part.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Ssid(_) | Self::Mdid(_))
    }
}

impl FromStr for ResourceIdentifier {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(caps) = BV_ID.captures(s) {
            return Ok(Self::Bvid(format!("BV{}", &caps[1])));
        }

        let caps = NUMERIC_ID
            .captures(s)
            .ok_or_else(|| ApiError::InvalidIdentifier(s.to_string()))?;
        let value: u64 = caps[2]
            .parse()
            .map_err(|_| ApiError::InvalidIdentifier(s.to_string()))?;

        Ok(match caps[1].to_ascii_lowercase().as_str() {
            "av" => Self::Avid(value),
            "ep" => Self::Epid(value),
            "ss" => Self::Ssid(value),
            _ => Self::Mdid(value),
        })
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avid(n) => write!(f, "av{n}"),
            Self::Bvid(s) => f.write_str(s),
            Self::Epid(n) => write!(f, "ep{n}"),
            Self::Ssid(n) => write!(f, "ss{n}"),
            Self::Mdid(n) => write!(f, "md{n}"),
        }
    }
}

/// Convert an av number to its BV form.
pub fn av2bv(aid: u64) -> String {
    let mut bytes = *b"BV1000000000";
    let mut idx = bytes.len() - 1;
    let mut tmp = (MAX_AID | aid) ^ XOR_CODE;
    while tmp > 0 && idx > 2 {
        bytes[idx] = ALPHABET[(tmp % BASE) as usize];
        tmp /= BASE;
        idx -= 1;
    }
    bytes.swap(3, 9);
    bytes.swap(4, 7);
    // Only ASCII from the template and alphabet is ever written.
    bytes.iter().map(|&b| b as char).collect()
}

/// Convert a BV identifier back to its av number.
pub fn bv2av(bvid: &str) -> Result<u64> {
    let invalid = || ApiError::InvalidIdentifier(bvid.to_string());

    let mut bytes: Vec<u8> = bvid.bytes().collect();
    if bytes.len() != 12 || !bytes[..2].eq_ignore_ascii_case(b"BV") {
        return Err(invalid());
    }
    bytes.swap(3, 9);
    bytes.swap(4, 7);

    let mut tmp: u64 = 0;
    for &b in &bytes[3..] {
        let digit = ALPHABET.iter().position(|&a| a == b).ok_or_else(invalid)?;
        tmp = tmp.checked_mul(BASE).ok_or_else(invalid)? + digit as u64;
    }
    Ok((tmp & MASK_CODE) ^ XOR_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VECTORS: [(u64, &str); 4] = [
        (170001, "BV17x411w7KC"),
        (2, "BV1xx411c7mD"),
        (1054803170, "BV1mH4y1u7UA"),
        (111298867365120, "BV1L9Uoa9EUx"),
    ];

    #[test]
    fn test_parse_all_schemes() {
        assert_eq!(
            "av170001".parse::<ResourceIdentifier>().unwrap(),
            ResourceIdentifier::Avid(170001)
        );
        assert_eq!(
            "AV170001".parse::<ResourceIdentifier>().unwrap(),
            ResourceIdentifier::Avid(170001)
        );
        assert_eq!(
            "bv17x411w7KC".parse::<ResourceIdentifier>().unwrap(),
            ResourceIdentifier::Bvid("BV17x411w7KC".to_string())
        );
        assert_eq!(
            "ep508404".parse::<ResourceIdentifier>().unwrap(),
            ResourceIdentifier::Epid(508404)
        );
        assert_eq!(
            " SS999 ".parse::<ResourceIdentifier>().unwrap(),
            ResourceIdentifier::Ssid(999)
        );
        assert_eq!(
            "md28229051".parse::<ResourceIdentifier>().unwrap(),
            ResourceIdentifier::Mdid(28229051)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "",
            "av",
            "avx12",
            "BV17x411w7K",
            "BV17x411w7KCC",
            "xx123",
            "ss-1",
            "av99999999999999999999999",
        ] {
            assert!(
                matches!(
                    input.parse::<ResourceIdentifier>(),
                    Err(ApiError::InvalidIdentifier(_))
                ),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_round_trip() {
        for input in ["av1", "BV17x411w7KC", "ep2", "ss3", "md4"] {
            let id: ResourceIdentifier = input.parse().unwrap();
            assert_eq!(id.to_string(), input);
        }
        assert!(ResourceIdentifier::Ssid(1).is_collection());
        assert!(!ResourceIdentifier::Avid(1).is_collection());
    }

    #[test]
    fn test_av_bv_vectors() {
        for (aid, bvid) in VECTORS {
            assert_eq!(av2bv(aid), bvid);
            assert_eq!(bv2av(bvid).unwrap(), aid);
        }
    }

    #[test]
    fn test_bv2av_rejects_foreign_characters() {
        // '0' and 'O' are not part of the alphabet
        assert!(bv2av("BV100000000O").is_err());
        assert!(bv2av("BV1").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_av_bv_round_trip(aid in 1u64..MAX_AID) {
            let bvid = av2bv(aid);
            prop_assert_eq!(bvid.len(), 12);
            prop_assert_eq!(bv2av(&bvid).unwrap(), aid);
        }
    }
}
