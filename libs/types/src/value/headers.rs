//! Shared header list
//!
//! A cloned [`Headers`] points at the same list, so a callee that writes into
//! a header argument is visible to the caller.

use parking_lot::RwLock;
use std::sync::Arc;

const SET_COOKIE: &str = "set-cookie";

#[derive(Clone, Default)]
pub struct Headers {
    entries: Arc<RwLock<Vec<(String, String)>>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<N, V>(entries: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: AsRef<str>,
        V: Into<String>,
    {
        let headers = Self::new();
        for (name, value) in entries {
            headers.append(name.as_ref(), value);
        }
        headers
    }

    pub fn append(&self, name: &str, value: impl Into<String>) {
        self.entries
            .write()
            .push((name.to_ascii_lowercase(), value.into()));
    }

    pub fn set(&self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let mut entries = self.entries.write();
        entries.retain(|(n, _)| *n != name);
        entries.push((name, value.into()));
    }

    pub fn delete(&self, name: &str) {
        let name = name.to_ascii_lowercase();
        self.entries.write().retain(|(n, _)| *n != name);
    }

    pub fn has(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.entries.read().iter().any(|(n, _)| *n == name)
    }

    /// All values for `name` joined with `", "`
    pub fn get(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let values: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Every `set-cookie` value, kept separate
    pub fn get_set_cookie(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(n, _)| n == SET_COOKIE)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Raw entries in insertion order, repeated names included
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries) || self.entries() == other.entries()
    }
}

impl std::fmt::Debug for Headers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}
