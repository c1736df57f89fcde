use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::error::CodecError;

/// Identifier of an offer, operation, crossing or transaction:
/// `user@host[token]`. The owner's host names the mint storing the canonical
/// row, which is where propagated copies are pulled from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityId {
    pub owner: Address,
    pub token: String,
}

impl EntityId {
    /// Mints a fresh identifier for `owner`, e.g. `offer_3f2a...`.
    pub fn generate(owner: Address, kind: &str) -> EntityId {
        EntityId {
            owner,
            token: format!("{}_{}", kind, Uuid::new_v4().simple()),
        }
    }

    pub fn host(&self) -> &str {
        &self.owner.host
    }
}

fn valid_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

impl FromStr for EntityId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<EntityId, CodecError> {
        let invalid = || CodecError::InvalidId(s.to_string());
        let open = s.find('[').ok_or_else(invalid)?;
        if !s.ends_with(']') {
            return Err(invalid());
        }
        let owner: Address = s[..open].parse().map_err(|_| invalid())?;
        let token = &s[open + 1..s.len() - 1];
        if !valid_token(token) {
            return Err(invalid());
        }
        Ok(EntityId {
            owner,
            token: token.to_string(),
        })
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.owner, self.token)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<EntityId, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_round_trip() {
        let owner: Address = "u1@m1.mint.test".parse().unwrap();
        let id = EntityId::generate(owner.clone(), "offer");
        assert!(id.token.starts_with("offer_"));
        assert_eq!(id.host(), "m1.mint.test");
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_asset_names_and_garbage() {
        // An asset name is not an entity id: the token grammar differs.
        assert!("u1@m1[USD.2]".parse::<EntityId>().is_err());
        assert!("u1@m1[]".parse::<EntityId>().is_err());
        assert!("u1@m1".parse::<EntityId>().is_err());
        assert!("offer_abc".parse::<EntityId>().is_err());
    }
}
