//! Postcodes and the 2-digit region keys both pipelines aggregate on.

use std::fmt::{Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A full 4-digit postcode, e.g. `2000` or `0800`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Postcode(String);

/// A 2-digit postal-area code derived by truncating a [`Postcode`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionKey(String);

impl Postcode {
    /// Normalise a raw identifier cell. Identifiers exported as numbers lose their leading zero
    /// (`800`) or gain a fraction (`2000.0`), so the value is read as a number and zero-padded.
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim().parse::<f64>().ok()?;
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > 9999.0 {
            return None;
        }
        Some(Self(format!("{:04}", value as u32)))
    }

    pub fn region_key(&self) -> RegionKey {
        RegionKey(self.0[..2].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RegionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Postcode {
    type Err = String;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| format!("'{value}' is not a 4-digit postcode"))
    }
}

impl FromStr for RegionKey {
    type Err = String;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.len() == 2 && value.chars().all(|c| c.is_ascii_digit()) {
            Ok(Self(value.to_string()))
        } else {
            Err(format!("'{value}' is not a 2-digit region key"))
        }
    }
}

impl Display for Postcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for RegionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The spatial level a series is keyed on. Aggregating to a level is a pure function of the
/// postcode, so `Postcode` is the identity level and `RegionKey` the 2-digit level.
pub trait AreaKey: Clone + Ord + Display + Debug {
    fn from_postcode(postcode: &Postcode) -> Self;
}

impl AreaKey for Postcode {
    fn from_postcode(postcode: &Postcode) -> Self {
        postcode.clone()
    }
}

impl AreaKey for RegionKey {
    fn from_postcode(postcode: &Postcode) -> Self {
        postcode.region_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postcode_should_parse_numeric_identifiers() {
        assert_eq!(Postcode::parse("2000").unwrap().as_str(), "2000");
        assert_eq!(Postcode::parse(" 2000.0 ").unwrap().as_str(), "2000");
        assert_eq!(
            Postcode::parse("800").unwrap().as_str(),
            "0800",
            "Leading zeros should be restored"
        );
    }

    #[test]
    fn postcode_should_not_parse_if_incorrect() {
        assert!(Postcode::parse("").is_none());
        assert!(Postcode::parse("Total").is_none());
        assert!(Postcode::parse("20001").is_none(), "Too many digits");
        assert!(Postcode::parse("2000.5").is_none());
        assert!(Postcode::parse("-200").is_none());
        assert!(Postcode::parse("NaN").is_none());
    }

    #[test]
    fn region_key_truncates_postcode() {
        let postcode: Postcode = "2001".parse().unwrap();
        assert_eq!(postcode.region_key().as_str(), "20");
        assert_eq!(RegionKey::from_postcode(&postcode), "20".parse().unwrap());
        assert_eq!(Postcode::from_postcode(&postcode), postcode);
    }

    #[test]
    fn region_key_should_not_parse_if_incorrect() {
        assert!("2".parse::<RegionKey>().is_err());
        assert!("200".parse::<RegionKey>().is_err());
        assert!("a0".parse::<RegionKey>().is_err());
    }
}
