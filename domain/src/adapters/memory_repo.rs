use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::{Clock, CoreError, LinkKey, LinkRecord, LinkRepository, SystemClock};

/// Simple in-memory repository for tests and local runs. Expired records are
/// hidden from reads and evicted on the next write.
pub struct InMemoryRepo {
    inner: Mutex<BTreeMap<LinkKey, LinkRecord>>,
    clock: Box<dyn Clock>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            clock: Box::new(clock),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<LinkKey, LinkRecord>>, CoreError> {
        self.inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))
    }
}

impl Default for InMemoryRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkRepository for InMemoryRepo {
    fn get(&self, key: &LinkKey) -> Result<Option<LinkRecord>, CoreError> {
        let now = self.clock.now();
        let map = self.lock()?;
        Ok(map.get(key).filter(|r| !r.is_expired(now)).cloned())
    }

    fn get_all(&self, keys: Option<&[LinkKey]>) -> Result<Vec<LinkRecord>, CoreError> {
        let now = self.clock.now();
        let map = self.lock()?;
        let live = |r: &&LinkRecord| !r.is_expired(now);
        Ok(match keys {
            Some(keys) => keys
                .iter()
                .filter_map(|k| map.get(k))
                .filter(live)
                .cloned()
                .collect(),
            None => map.values().filter(live).cloned().collect(),
        })
    }

    fn set(&self, record: LinkRecord) -> Result<(), CoreError> {
        let now = self.clock.now();
        let mut map = self.lock()?;
        map.retain(|_, r| !r.is_expired(now));
        map.insert(record.key.clone(), record);
        Ok(())
    }

    fn delete(&self, keys: &[LinkKey]) -> Result<usize, CoreError> {
        let mut map = self.lock()?;
        Ok(keys.iter().filter(|k| map.remove(*k).is_some()).count())
    }
}
