//! Address labels
//!
//! The core only ever asks an address book for a display label; how labels
//! are stored is up to the embedding application.

use crate::crypto::Address;
use std::collections::HashMap;
use std::sync::RwLock;

pub trait AddressBook: Send + Sync {
    fn label(&self, address: &Address) -> Option<String>;
}

/// Process-local address book
#[derive(Debug, Default)]
pub struct InMemoryAddressBook {
    labels: RwLock<HashMap<Address, String>>,
}

impl InMemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_label(&self, address: Address, label: impl Into<String>) {
        if let Ok(mut labels) = self.labels.write() {
            labels.insert(address, label.into());
        }
    }

    pub fn remove(&self, address: &Address) -> Option<String> {
        self.labels.write().ok()?.remove(address)
    }
}

impl AddressBook for InMemoryAddressBook {
    fn label(&self, address: &Address) -> Option<String> {
        self.labels.read().ok()?.get(address).cloned()
    }
}
