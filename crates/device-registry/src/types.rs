use ble_transport::Capability;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifies one device session. A rediscovered device gets a new one.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read view of an Active device, written only by its owning session.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub session: SessionId,
    pub kind: String,
    pub capabilities: BTreeSet<Capability>,
    pub activated_at: OffsetDateTime,
    pub last_seen: OffsetDateTime,
}

impl RegistryEntry {
    pub fn new(session: SessionId, kind: impl Into<String>, capabilities: BTreeSet<Capability>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            session,
            kind: kind.into(),
            capabilities,
            activated_at: now,
            last_seen: now,
        }
    }
}

/// Payload of the device-listing reply: id -> last seen (unix seconds).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceListing {
    pub devices: BTreeMap<String, i64>,
}
