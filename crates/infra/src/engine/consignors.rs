use std::collections::HashMap;
use std::sync::RwLock;

use cardflow_consignment::{Consignor, ConsignorId};

/// In-memory consignor registry.
///
/// The engine resolves default terms from here when a consigned card arrives
/// without a per-row override. Lookups return clones; the snapshot the card
/// captures is therefore independent of later edits.
#[derive(Debug, Default)]
pub struct ConsignorDirectory {
    inner: RwLock<HashMap<ConsignorId, Consignor>>,
}

impl ConsignorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ConsignorId) -> Option<Consignor> {
        self.inner.read().ok()?.get(id).cloned()
    }

    pub fn upsert(&self, consignor: Consignor) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(consignor.id, consignor);
        }
    }

    pub fn list(&self) -> Vec<Consignor> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}
