//! Cooldown registry for recently synced peers

use std::collections::HashMap;

use crate::api::{Address, AddressKey, Timestamp};

/// Addresses under cooldown, keyed by location/sublocation/port and mapped
/// to the time the cooldown ends.
#[derive(Debug, Clone)]
pub struct ExclusionList {
    entries: HashMap<AddressKey, Timestamp>,
    live_ttl: i64,
    static_ttl: i64,
}

impl ExclusionList {
    pub fn new(live_ttl_secs: u64, static_ttl_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            live_ttl: live_ttl_secs as i64,
            static_ttl: static_ttl_secs as i64,
        }
    }

    fn ttl(&self, address: &Address) -> i64 {
        if address.is_static() {
            self.static_ttl
        } else {
            self.live_ttl
        }
    }

    /// Put an address on cooldown starting at `now`.
    pub fn exclude(&mut self, address: &Address, now: Timestamp) {
        let until = now + self.ttl(address);
        self.entries.insert(address.key(), until);
    }

    pub fn is_excluded(&self, key: &AddressKey, now: Timestamp) -> bool {
        self.entries.get(key).is_some_and(|until| now < *until)
    }

    /// Forget cooldowns that have run out.
    pub fn purge_expired(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, until| now < *until);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::address_type;

    #[test]
    fn test_ttl_follows_address_type() {
        let mut list = ExclusionList::new(60, 3600);
        let mut live = Address::new("10.0.0.1", 1);
        live.address_type = address_type::LIVE;
        let mut stat = Address::new("10.0.0.2", 1);
        stat.address_type = address_type::STATIC;

        list.exclude(&live, 1000);
        list.exclude(&stat, 1000);

        assert!(list.is_excluded(&live.key(), 1059));
        assert!(!list.is_excluded(&live.key(), 1060));
        assert!(list.is_excluded(&stat.key(), 1060));
        assert!(!list.is_excluded(&stat.key(), 4600));

        assert_eq!(list.purge_expired(1060), 1);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_key_ignores_volatile_fields() {
        let mut list = ExclusionList::new(60, 60);
        let mut a = Address::new("10.0.0.1", 1);
        list.exclude(&a, 0);
        a.last_online = 12345;
        a.client.name = "other".into();
        assert!(list.is_excluded(&a.key(), 10));
    }
}
