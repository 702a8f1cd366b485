//! DHCP Unique Identifiers, client- and server-side.
//!
//! A client DUID is an opaque byte string; only its two-byte type code is
//! interpreted, and the raw bytes are always kept so replies can echo them
//! verbatim. The server's own DUID is the RFC 6355 UUID form derived from the
//! configured server UUID, stable across restarts.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// DUID type codes from RFC 8415 §11 (type 4 from RFC 6355).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuidType {
    LinkLayerTime,
    EnterpriseNumber,
    LinkLayer,
    Uuid,
}

impl DuidType {
    fn from_code(code: u16) -> Option<DuidType> {
        match code {
            1 => Some(DuidType::LinkLayerTime),
            2 => Some(DuidType::EnterpriseNumber),
            3 => Some(DuidType::LinkLayer),
            4 => Some(DuidType::Uuid),
            _ => None,
        }
    }
}

/// A client DUID as received in a ClientId option.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Duid {
    bytes: Vec<u8>,
}

impl Duid {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Duid { bytes }
    }

    /// The raw bytes, exactly as received, for echoing back to the client.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The recognised type code, if any. Callers warn on `None`; the raw
    /// bytes remain usable either way.
    pub fn type_code(&self) -> Option<DuidType> {
        if self.bytes.len() < 2 {
            return None;
        }
        DuidType::from_code(u16::from_be_bytes([self.bytes[0], self.bytes[1]]))
    }

    /// Lowercase hex of the identifier content after the type code. Used in
    /// cache keys and inventory lookups.
    pub fn hex(&self) -> String {
        let content = if self.bytes.len() >= 2 {
            &self.bytes[2..]
        } else {
            &self.bytes[..]
        };
        let mut s = String::with_capacity(content.len() * 2);
        for b in content {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }

    /// The embedded UUID for a type-4 DUID with a full 16-byte body.
    pub fn uuid(&self) -> Option<Uuid> {
        if self.type_code() != Some(DuidType::Uuid) || self.bytes.len() < 18 {
            return None;
        }
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&self.bytes[2..18]);
        Some(Uuid::from_bytes(raw))
    }
}

impl fmt::Display for Duid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uuid() {
            Some(uuid) => write!(f, "{uuid}"),
            None => write!(f, "{}", self.hex()),
        }
    }
}

/// This server's DUID: 18 bytes big-endian, type code 4, then the configured
/// UUID (RFC 6355 §4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDuid {
    bytes: [u8; 18],
}

impl ServerDuid {
    pub fn from_uuid(uuid: &Uuid) -> Self {
        let mut bytes = [0u8; 18];
        bytes[0..2].copy_from_slice(&4u16.to_be_bytes());
        bytes[2..18].copy_from_slice(uuid.as_bytes());
        ServerDuid { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// True when a client-supplied ServerId matches this server.
    pub fn matches(&self, other: &[u8]) -> bool {
        self.bytes == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_duid_renders_as_uuid() {
        let uuid: Uuid = "6ba7b810-9dad-11d1-80b4-00c04fd430c8".parse().unwrap();
        let mut raw = vec![0x00, 0x04];
        raw.extend_from_slice(uuid.as_bytes());
        let duid = Duid::from_bytes(raw);
        assert_eq!(duid.type_code(), Some(DuidType::Uuid));
        assert_eq!(duid.to_string(), "6ba7b810-9dad-11d1-80b4-00c04fd430c8");
    }

    #[test]
    fn link_layer_duid_renders_as_hex() {
        let duid = Duid::from_bytes(vec![0x00, 0x03, 0x00, 0x01, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        assert_eq!(duid.type_code(), Some(DuidType::LinkLayer));
        assert_eq!(duid.to_string(), "0001aabbccddee01");
    }

    #[test]
    fn unknown_type_code_still_usable() {
        let duid = Duid::from_bytes(vec![0x00, 0x99, 0xab, 0xcd]);
        assert_eq!(duid.type_code(), None);
        assert_eq!(duid.hex(), "abcd");
        assert_eq!(duid.as_bytes(), &[0x00, 0x99, 0xab, 0xcd]);
    }

    #[test]
    fn truncated_uuid_duid_falls_back_to_hex() {
        let duid = Duid::from_bytes(vec![0x00, 0x04, 0x01, 0x02]);
        assert_eq!(duid.uuid(), None);
        assert_eq!(duid.to_string(), "0102");
    }

    #[test]
    fn server_duid_layout() {
        let uuid: Uuid = "6ba7b810-9dad-11d1-80b4-00c04fd430c8".parse().unwrap();
        let duid = ServerDuid::from_uuid(&uuid);
        assert_eq!(duid.as_bytes().len(), 18);
        assert_eq!(&duid.as_bytes()[0..2], &[0x00, 0x04]);
        assert_eq!(&duid.as_bytes()[2..18], uuid.as_bytes());
        assert!(duid.matches(duid.as_bytes()));
        assert!(!duid.matches(&[0u8; 18]));
    }
}
