//! Address-indexed heap of live sandbox objects
//!
//! Addresses 0 and 1 hold the global scope and the environment for the life
//! of the dispatcher. Everything else is handed out from a counter starting
//! at 2 and released by `FREE`.

use hearth_codec::{CodecError, NativeRegistry};
use hearth_types::protocol::PROMISE_TYPE_NAME;
use hearth_types::{NativeTarget, Pending, Value, ADDRESS_ENV, ADDRESS_GLOBAL, ADDRESS_USER_START};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use super::object::{LiveObject, RemoteObject};

enum HeapEntry {
    Object(Arc<dyn RemoteObject>),
    /// A pending result parked by a synchronous request, removed again the
    /// first time it is revived
    Pending(Pending),
}

struct HeapState {
    entries: HashMap<u64, HeapEntry>,
    next_address: u64,
}

pub struct Heap {
    state: Mutex<HeapState>,
}

impl Heap {
    pub fn new(global: Arc<dyn RemoteObject>, env: Arc<dyn RemoteObject>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(ADDRESS_GLOBAL, HeapEntry::Object(global));
        entries.insert(ADDRESS_ENV, HeapEntry::Object(env));
        Self {
            state: Mutex::new(HeapState {
                entries,
                next_address: ADDRESS_USER_START,
            }),
        }
    }

    fn insert(&self, entry: HeapEntry) -> u64 {
        let mut state = self.state.lock();
        let address = state.next_address;
        state.next_address += 1;
        state.entries.insert(address, entry);
        address
    }

    pub fn insert_object(&self, object: Arc<dyn RemoteObject>) -> u64 {
        self.insert(HeapEntry::Object(object))
    }

    pub fn insert_pending(&self, pending: Pending) -> u64 {
        self.insert(HeapEntry::Pending(pending))
    }

    /// Value stored at `address`. Pending entries are removed as they are
    /// handed out.
    pub fn revive(&self, address: u64) -> Option<Value> {
        let mut state = self.state.lock();
        match state.entries.get(&address)? {
            HeapEntry::Object(object) => Some(Value::Native(Arc::new(LiveObject::new(
                object.clone(),
            )))),
            HeapEntry::Pending(_) => match state.entries.remove(&address) {
                Some(HeapEntry::Pending(pending)) => Some(Value::Promise(pending)),
                _ => None,
            },
        }
    }

    /// Release user addresses. Unknown addresses and roots are ignored.
    pub fn free(&self, addresses: &[u64]) {
        let mut state = self.state.lock();
        for address in addresses {
            if *address < ADDRESS_USER_START {
                continue;
            }
            if state.entries.remove(address).is_some() {
                trace!(address, "Freed heap entry");
            }
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.state.lock().entries.contains_key(&address)
    }

    /// Number of entries, roots included
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Codec registry that stores outgoing references on the heap and resolves
/// incoming ones against it
pub struct HeapRegistry<'a> {
    heap: &'a Heap,
}

impl<'a> HeapRegistry<'a> {
    pub fn new(heap: &'a Heap) -> Self {
        Self { heap }
    }
}

impl NativeRegistry for HeapRegistry<'_> {
    fn reduce(&self, value: &Value) -> hearth_codec::Result<Option<NativeTarget>> {
        match value {
            Value::Native(native) => {
                let Some(live) = native.as_any().downcast_ref::<LiveObject>() else {
                    return Ok(None);
                };
                let object = live.object().clone();
                let target = NativeTarget::new(0, object.type_name(), object.is_function());
                let address = self.heap.insert_object(object);
                Ok(Some(NativeTarget { address, ..target }))
            }
            Value::Promise(pending) => {
                let address = self.heap.insert_pending(pending.clone());
                Ok(Some(NativeTarget::new(address, PROMISE_TYPE_NAME, false)))
            }
            _ => Ok(None),
        }
    }

    fn revive(&self, target: NativeTarget) -> hearth_codec::Result<Value> {
        self.heap.revive(target.address).ok_or_else(|| {
            CodecError::native(format!(
                "{} at address {} has been freed or never existed",
                target.type_name, target.address
            ))
        })
    }
}
