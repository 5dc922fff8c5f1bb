use crate::types::{DeviceListing, RegistryEntry, SessionId};
use ble_transport::PeripheralId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

/// Shared map of Active devices.
///
/// Mutations that refresh or remove an entry take the caller's [`SessionId`] and
/// are ignored unless it owns the entry, so a stale session can never touch the
/// entry of the session that replaced it.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    devices: Arc<RwLock<HashMap<PeripheralId, RegistryEntry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a device that just finished configuration.
    ///
    /// Returns the entry it displaced, if an older session still held the id.
    pub fn activate(&self, id: PeripheralId, entry: RegistryEntry) -> Option<RegistryEntry> {
        let previous = self.devices.write().insert(id.clone(), entry);
        if let Some(prev) = &previous {
            debug!(device = %id, stale_session = %prev.session, "registry entry replaced");
        }
        previous
    }

    /// Refresh last-seen. Returns false if `session` no longer owns the id.
    pub fn touch(&self, id: &PeripheralId, session: SessionId) -> bool {
        self.touch_at(id, session, OffsetDateTime::now_utc())
    }

    pub fn touch_at(&self, id: &PeripheralId, session: SessionId, at: OffsetDateTime) -> bool {
        let mut devices = self.devices.write();
        match devices.get_mut(id) {
            Some(entry) if entry.session == session => {
                entry.last_seen = at;
                true
            }
            _ => false,
        }
    }

    /// Remove the entry if `session` owns it.
    pub fn remove(&self, id: &PeripheralId, session: SessionId) -> bool {
        let mut devices = self.devices.write();
        match devices.get(id) {
            Some(entry) if entry.session == session => {
                devices.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn is_owned_by(&self, id: &PeripheralId, session: SessionId) -> bool {
        self.devices
            .read()
            .get(id)
            .is_some_and(|entry| entry.session == session)
    }

    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.devices.read().contains_key(id)
    }

    pub fn get(&self, id: &PeripheralId) -> Option<RegistryEntry> {
        self.devices.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn listing(&self) -> DeviceListing {
        let devices = self
            .devices
            .read()
            .iter()
            .map(|(id, entry)| (id.to_string(), entry.last_seen.unix_timestamp()))
            .collect();
        DeviceListing { devices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble_transport::Capability;
    use std::collections::BTreeSet;

    fn entry(session: SessionId) -> RegistryEntry {
        let caps: BTreeSet<_> = [Capability::Humidity].into_iter().collect();
        RegistryEntry::new(session, "CC2650", caps)
    }

    #[test]
    fn activate_touch_remove() {
        let reg = Registry::new();
        let id = PeripheralId::new("AA:BB:CC");
        let session = SessionId::new();

        assert!(reg.activate(id.clone(), entry(session)).is_none());
        assert!(reg.contains(&id));
        assert!(reg.is_owned_by(&id, session));

        let later = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert!(reg.touch_at(&id, session, later));
        assert_eq!(reg.get(&id).unwrap().last_seen, later);

        assert!(reg.remove(&id, session));
        assert!(reg.is_empty());
        assert!(!reg.remove(&id, session));
    }

    #[test]
    fn foreign_session_cannot_mutate() {
        let reg = Registry::new();
        let id = PeripheralId::new("AA:BB:CC");
        let old = SessionId::new();
        let new = SessionId::new();

        reg.activate(id.clone(), entry(old));
        let displaced = reg.activate(id.clone(), entry(new));
        assert_eq!(displaced.unwrap().session, old);

        assert!(!reg.touch(&id, old));
        assert!(!reg.remove(&id, old));
        assert!(reg.is_owned_by(&id, new));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn listing_maps_ids_to_unix_seconds() {
        let reg = Registry::new();
        let s1 = SessionId::new();
        let s2 = SessionId::new();
        reg.activate(PeripheralId::new("01"), entry(s1));
        reg.activate(PeripheralId::new("02"), entry(s2));
        let at = OffsetDateTime::from_unix_timestamp(1_600_000_000).unwrap();
        reg.touch_at(&PeripheralId::new("01"), s1, at);

        let listing = reg.listing();
        assert_eq!(listing.devices.len(), 2);
        assert_eq!(listing.devices["01"], 1_600_000_000);

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["devices"]["01"], serde_json::json!(1_600_000_000));
    }

    #[test]
    fn clones_share_state() {
        let reg = Registry::new();
        let view = reg.clone();
        reg.activate(PeripheralId::new("01"), entry(SessionId::new()));
        assert_eq!(view.len(), 1);
    }
}
