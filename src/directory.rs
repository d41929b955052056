//! Resolution of logical party names to identities
use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::types::Party;

pub trait PartyDirectory: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Party>;

    /// Every party known to the directory, ordered by name.
    fn parties(&self) -> Vec<Party>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    parties: RwLock<BTreeMap<String, Party>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with a fresh key, or return the party already
    /// registered under it.
    pub fn register(&self, name: &str) -> Party {
        let mut parties = match self.parties.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        parties
            .entry(name.to_string())
            .or_insert_with(|| {
                let party = Party::new(name);
                debug!(party = %party, "Registered party");
                party
            })
            .clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Party>> {
        match self.parties.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PartyDirectory for InMemoryDirectory {
    fn resolve(&self, name: &str) -> Option<Party> {
        self.read().get(name).cloned()
    }

    fn parties(&self) -> Vec<Party> {
        self.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let directory = InMemoryDirectory::new();
        let first = directory.register("auto1");
        let second = directory.register("auto1");

        assert_eq!(first, second);
        assert_eq!(directory.parties().len(), 1);
        assert_eq!(directory.resolve("auto1"), Some(first));
        assert_eq!(directory.resolve("auto2"), None);
    }
}
