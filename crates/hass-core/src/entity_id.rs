//! Entity ID type representing a `domain.object_id` pair

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid entity IDs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity id must contain a '.' separating domain and object id")]
    MissingSeparator,

    #[error("invalid domain: {0:?}")]
    InvalidDomain(String),

    #[error("invalid object id: {0:?}")]
    InvalidObjectId(String),
}

/// An entity identifier such as `climate.living_room`.
///
/// Both parts are lowercase alphanumeric with underscores and may not start or
/// end with an underscore. Domains additionally may not contain `__`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    /// Create a new EntityId from validated parts.
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if !is_valid_part(&domain) || domain.contains("__") {
            return Err(EntityIdError::InvalidDomain(domain));
        }
        if !is_valid_part(&object_id) {
            return Err(EntityIdError::InvalidObjectId(object_id));
        }

        Ok(Self { domain, object_id })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

/// Matches the host's object id rule: `(?!_)[\da-z_]+(?<!_)`
fn is_valid_part(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, object_id) = s.split_once('.').ok_or(EntityIdError::MissingSeparator)?;
        if object_id.contains('.') {
            return Err(EntityIdError::InvalidObjectId(object_id.to_string()));
        }
        Self::new(domain, object_id)
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid() {
        let id: EntityId = "binary_sensor.kitchen_window".parse().unwrap();
        assert_eq!(id.domain(), "binary_sensor");
        assert_eq!(id.object_id(), "kitchen_window");
        assert_eq!(id.to_string(), "binary_sensor.kitchen_window");
    }

    #[test]
    fn missing_separator() {
        assert_eq!(
            "climate".parse::<EntityId>().unwrap_err(),
            EntityIdError::MissingSeparator
        );
    }

    #[test]
    fn extra_separator_rejected() {
        assert!(matches!(
            "a.b.c".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidObjectId(_)
        ));
    }

    #[test]
    fn invalid_chars_rejected() {
        assert!(matches!(
            "Climate.room".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidDomain(_)
        ));
        assert!(matches!(
            "climate.Room".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidObjectId(_)
        ));
        assert!(matches!(
            "climate.room-1".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidObjectId(_)
        ));
    }

    #[test]
    fn underscore_rules() {
        assert!("_climate.room".parse::<EntityId>().is_err());
        assert!("climate._room".parse::<EntityId>().is_err());
        assert!("climate.room_".parse::<EntityId>().is_err());
        assert!("my__domain.room".parse::<EntityId>().is_err());
        // Double underscore is allowed in the object id, like the host.
        assert!("climate.my__room".parse::<EntityId>().is_ok());
    }

    #[test]
    fn serde_as_string() {
        let id = EntityId::new("sensor", "temperature").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sensor.temperature\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
