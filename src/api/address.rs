//! Peer addresses

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use super::entity::{EntityKind, Timestamp};

/// Address types as advertised on the wire.
pub mod address_type {
    pub const LIVE: u8 = 2;
    pub const LIVE_BOOTSTRAP: u8 = 3;
    pub const STATIC_BOOTSTRAP: u8 = 254;
    pub const STATIC: u8 = 255;
}

/// Location types: how `location` should be parsed.
pub mod location_type {
    pub const URL: u8 = 3;
    pub const IPV4: u8 = 4;
    pub const IPV6: u8 = 6;
}

/// Name of the content subprotocol.
pub const CONTENT_SUBPROTOCOL: &str = "c0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subprotocol {
    pub name: String,
    pub version_major: u8,
    pub version_minor: u16,
    pub supported_entities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Protocol {
    pub version_major: u8,
    pub version_minor: u16,
    pub subprotocols: Vec<Subprotocol>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Client {
    pub version_major: u8,
    pub version_minor: u16,
    pub version_patch: u16,
    pub name: String,
}

/// A peer record.
///
/// `last_successful_ping` and `last_successful_sync` are local bookkeeping
/// and never cross the wire, so a remote can't claim them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub location: String,
    pub sublocation: String,
    pub location_type: u8,
    pub port: u16,
    #[serde(rename = "type")]
    pub address_type: u8,
    pub last_online: Timestamp,
    pub protocol: Protocol,
    pub client: Client,
    #[serde(skip)]
    pub last_successful_ping: Timestamp,
    #[serde(skip)]
    pub last_successful_sync: Timestamp,
}

/// Stable identity of an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressKey {
    pub location: String,
    pub sublocation: String,
    pub port: u16,
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sublocation.is_empty() {
            write!(f, "{}:{}", self.location, self.port)
        } else {
            write!(f, "{}/{}:{}", self.location, self.sublocation, self.port)
        }
    }
}

impl Address {
    pub fn new(location: impl Into<String>, port: u16) -> Self {
        let location = location.into();
        Self {
            location_type: location_type_of(&location),
            location,
            port,
            ..Default::default()
        }
    }

    pub fn key(&self) -> AddressKey {
        AddressKey {
            location: self.location.clone(),
            sublocation: self.sublocation.clone(),
            port: self.port,
        }
    }

    pub fn same_as(&self, other: &Address) -> bool {
        self.location == other.location
            && self.sublocation == other.sublocation
            && self.port == other.port
    }

    /// Static nodes serve pre-generated caches only and take no POSTs.
    pub fn is_static(&self) -> bool {
        matches!(
            self.address_type,
            address_type::STATIC | address_type::STATIC_BOOTSTRAP
        )
    }

    pub fn is_bootstrapper(&self) -> bool {
        matches!(
            self.address_type,
            address_type::LIVE_BOOTSTRAP | address_type::STATIC_BOOTSTRAP
        )
    }

    /// Entity types the peer advertises under the content subprotocol.
    pub fn supported_kinds(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<EntityKind> = self
            .protocol
            .subprotocols
            .iter()
            .filter(|s| s.name == CONTENT_SUBPROTOCOL)
            .flat_map(|s| s.supported_entities.iter())
            .filter_map(|name| EntityKind::from_plural(name))
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// IPv4 and IPv6 literals are typed as such, anything else is a URL.
pub fn location_type_of(location: &str) -> u8 {
    match location.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => location_type::IPV4,
        Ok(IpAddr::V6(_)) => location_type::IPV6,
        Err(_) => location_type::URL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_fields_never_serialized() {
        let mut addr = Address::new("10.0.0.1", 8000);
        addr.last_successful_ping = 42;
        addr.last_successful_sync = 43;

        let json = serde_json::to_value(&addr).unwrap();
        assert!(json.get("last_successful_ping").is_none());
        assert_eq!(json["type"], 0);

        let spoofed: Address = serde_json::from_str(
            r#"{"location":"10.0.0.1","port":8000,"last_successful_ping":99}"#,
        )
        .unwrap();
        assert_eq!(spoofed.last_successful_ping, 0);
    }

    #[test]
    fn test_location_type_detection() {
        assert_eq!(location_type_of("127.0.0.1"), location_type::IPV4);
        assert_eq!(location_type_of("::1"), location_type::IPV6);
        assert_eq!(location_type_of("example.org"), location_type::URL);
    }

    #[test]
    fn test_supported_kinds_reads_content_subprotocol_only() {
        let mut addr = Address::new("10.0.0.1", 8000);
        addr.protocol.subprotocols = vec![
            Subprotocol {
                name: "c0".into(),
                supported_entities: vec!["posts".into(), "boards".into(), "bogus".into()],
                ..Default::default()
            },
            Subprotocol {
                name: "dweb".into(),
                supported_entities: vec!["keys".into()],
                ..Default::default()
            },
        ];
        assert_eq!(
            addr.supported_kinds(),
            vec![EntityKind::Board, EntityKind::Post]
        );
    }
}
