use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

fn valid_user(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
}

fn valid_host(s: &str) -> bool {
    // Host names may carry a port suffix, which matters for local multi-mint
    // deployments.
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b':')
}

/// A user on a mint, `user@host`. The host names the mint that is
/// authoritative for the user's assets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub user: String,
    pub host: String,
}

impl Address {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Address {
        Address {
            user: user.into(),
            host: host.into(),
        }
    }
}

impl FromStr for Address {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Address, CodecError> {
        let (user, host) = s
            .split_once('@')
            .ok_or_else(|| CodecError::InvalidAddress(s.to_string()))?;
        if !valid_user(user) || !valid_host(host) {
            return Err(CodecError::InvalidAddress(s.to_string()));
        }
        Ok(Address {
            user: user.to_string(),
            host: host.to_string(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// An asset issued by a user, `user@host[CODE.scale]`: owner address, a 1-64
/// character uppercase alphanumeric code and a decimal scale in `0..=24`.
/// Unique per (owner, code, scale).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetName {
    pub owner: Address,
    pub code: String,
    pub scale: u8,
}

impl AssetName {
    pub fn new(owner: Address, code: impl Into<String>, scale: u8) -> Result<AssetName, CodecError> {
        let code = code.into();
        if !valid_code(&code) || scale > 24 {
            return Err(CodecError::InvalidAssetName(format!(
                "{}[{}.{}]",
                owner, code, scale
            )));
        }
        Ok(AssetName { owner, code, scale })
    }
}

fn valid_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= 64
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

impl FromStr for AssetName {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<AssetName, CodecError> {
        let invalid = || CodecError::InvalidAssetName(s.to_string());
        let open = s.find('[').ok_or_else(invalid)?;
        if !s.ends_with(']') {
            return Err(invalid());
        }
        let owner: Address = s[..open].parse().map_err(|_| invalid())?;
        let inner = &s[open + 1..s.len() - 1];
        let (code, scale) = inner.rsplit_once('.').ok_or_else(invalid)?;
        if !valid_code(code) {
            return Err(invalid());
        }
        let scale: u8 = scale.parse().map_err(|_| invalid())?;
        if scale > 24 {
            return Err(invalid());
        }
        Ok(AssetName {
            owner,
            code: code.to_string(),
            scale,
        })
    }
}

impl fmt::Display for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}.{}]", self.owner, self.code, self.scale)
    }
}

/// A `base/quote` pair of asset names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetPair {
    pub base: AssetName,
    pub quote: AssetName,
}

impl AssetPair {
    pub fn new(base: AssetName, quote: AssetName) -> AssetPair {
        AssetPair { base, quote }
    }
}

impl FromStr for AssetPair {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<AssetPair, CodecError> {
        // Asset names never contain '/', so a single split is unambiguous.
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| CodecError::InvalidPair(s.to_string()))?;
        let base: AssetName = base
            .parse()
            .map_err(|_| CodecError::InvalidPair(s.to_string()))?;
        let quote: AssetName = quote
            .parse()
            .map_err(|_| CodecError::InvalidPair(s.to_string()))?;
        Ok(AssetPair { base, quote })
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<$ty, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

string_serde!(Address);
string_serde!(AssetName);
string_serde!(AssetPair);
