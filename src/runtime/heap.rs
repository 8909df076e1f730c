use std::sync::Mutex;

use crate::runtime::value::{ArrId, ObjId, Value};

/// Outcome of dropping a strong reference to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecOutcome {
    Alive,
    /// Strong count reached zero on a live object: the caller must run the
    /// destructor cascade.
    NeedsDestroy,
    /// A destroyed tombstone lost its last reference and was freed.
    Freed,
}

#[derive(Debug)]
pub struct ObjRecord {
    pub class_key: String,
    pub fields: Vec<Value>,
    pub strong: usize,
    pub version: u64,
    pub has_tracked_field: bool,
    /// Set while the destructor cascade runs so re-entrant releases do not
    /// trigger a second destruction.
    pub destroying: bool,
    pub destroyed: bool,
}

#[derive(Debug)]
pub struct ArrRecord {
    pub items: Vec<Value>,
    pub strong: usize,
    pub version: u64,
}

/// Topology snapshot handed to the cycle sweep; plain data, no values.
#[derive(Debug, Clone)]
pub struct HeapSnapshot {
    pub objects: Vec<ObjSnap>,
    pub arrays: Vec<ArrSnap>,
}

#[derive(Debug, Clone)]
pub struct ObjSnap {
    pub id: ObjId,
    pub strong: usize,
    pub version: u64,
    pub tracked: bool,
    pub obj_edges: Vec<ObjId>,
    pub arr_edges: Vec<ArrId>,
}

#[derive(Debug, Clone)]
pub struct ArrSnap {
    pub id: ArrId,
    pub strong: usize,
    pub obj_edges: Vec<ObjId>,
}

#[derive(Default)]
struct HeapInner {
    objects: Vec<Option<ObjRecord>>,
    free_objects: Vec<ObjId>,
    arrays: Vec<Option<ArrRecord>>,
    free_arrays: Vec<ArrId>,
    live_objects: usize,
}

/// The object heap. Every strong count adjustment, allocation and field
/// write takes the lock, which is shared with the background cycle sweep.
#[derive(Default)]
pub struct Heap {
    inner: Mutex<HeapInner>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_object(&self, class_key: String, fields: Vec<Value>, tracked: bool) -> ObjId {
        let mut inner = self.inner.lock().unwrap();
        inner.live_objects += 1;
        let record = ObjRecord {
            class_key,
            fields,
            strong: 1,
            version: 0,
            has_tracked_field: tracked,
            destroying: false,
            destroyed: false,
        };
        match inner.free_objects.pop() {
            Some(id) => {
                inner.objects[id] = Some(record);
                id
            }
            None => {
                inner.objects.push(Some(record));
                inner.objects.len() - 1
            }
        }
    }

    pub fn alloc_array(&self, items: Vec<Value>) -> ArrId {
        let mut inner = self.inner.lock().unwrap();
        let record = ArrRecord { items, strong: 1, version: 0 };
        match inner.free_arrays.pop() {
            Some(id) => {
                inner.arrays[id] = Some(record);
                id
            }
            None => {
                inner.arrays.push(Some(record));
                inner.arrays.len() - 1
            }
        }
    }

    /// Adds one strong reference for every heap reference the value carries.
    pub fn retain(&self, value: &Value) {
        match value {
            Value::Object(id) => {
                let mut inner = self.inner.lock().unwrap();
                if let Some(record) = inner.objects[*id].as_mut() {
                    record.strong += 1;
                    record.version += 1;
                }
            }
            Value::Array(id) => {
                let mut inner = self.inner.lock().unwrap();
                if let Some(record) = inner.arrays[*id].as_mut() {
                    record.strong += 1;
                    record.version += 1;
                }
            }
            _ => {}
        }
    }

    pub fn dec_object(&self, id: ObjId) -> DecOutcome {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.objects[id].as_mut() else { return DecOutcome::Alive };
        record.strong = record.strong.saturating_sub(1);
        record.version += 1;
        if record.strong > 0 {
            return DecOutcome::Alive;
        }
        if record.destroyed {
            inner.objects[id] = None;
            inner.free_objects.push(id);
            DecOutcome::Freed
        } else if record.destroying {
            DecOutcome::Alive
        } else {
            DecOutcome::NeedsDestroy
        }
    }

    /// Drops a strong array reference; returns the items for release when
    /// the array dies.
    pub fn dec_array(&self, id: ArrId) -> Option<Vec<Value>> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.arrays[id].as_mut()?;
        record.strong = record.strong.saturating_sub(1);
        record.version += 1;
        if record.strong > 0 {
            return None;
        }
        let items = std::mem::take(&mut record.items);
        inner.arrays[id] = None;
        inner.free_arrays.push(id);
        Some(items)
    }

    pub fn class_of(&self, id: ObjId) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.objects[id].as_ref().map(|r| r.class_key.clone())
    }

    /// Destroyed or mid-destruction: `destroy` and the sweep treat both as
    /// gone.
    pub fn is_destroyed(&self, id: ObjId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.objects[id].as_ref().map_or(true, |r| r.destroyed || r.destroying)
    }

    /// Fully destroyed only: destructor bodies may still touch `this` while
    /// the cascade runs.
    pub fn is_fully_destroyed(&self, id: ObjId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.objects[id].as_ref().map_or(true, |r| r.destroyed)
    }

    pub fn get_field(&self, id: ObjId, slot: usize) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        inner.objects[id].as_ref().and_then(|r| r.fields.get(slot).cloned())
    }

    /// Stores a field value, returning the previous occupant for release.
    pub fn set_field(&self, id: ObjId, slot: usize, value: Value) -> Option<Value> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.objects[id].as_mut()?;
        record.version += 1;
        Some(std::mem::replace(&mut record.fields[slot], value))
    }

    pub fn array_len(&self, id: ArrId) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.arrays[id].as_ref().map_or(0, |r| r.items.len())
    }

    pub fn array_get(&self, id: ArrId, index: usize) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        inner.arrays[id].as_ref().and_then(|r| r.items.get(index).cloned())
    }

    pub fn array_set(&self, id: ArrId, index: usize, value: Value) -> Option<Value> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.arrays[id].as_mut()?;
        if index >= record.items.len() {
            return None;
        }
        record.version += 1;
        Some(std::mem::replace(&mut record.items[index], value))
    }

    pub fn array_items(&self, id: ArrId) -> Vec<Value> {
        let inner = self.inner.lock().unwrap();
        inner.arrays[id].as_ref().map_or_else(Vec::new, |r| r.items.clone())
    }

    /// Marks an object as mid-destruction. Returns false when it is already
    /// destroyed or being destroyed.
    pub fn begin_destroy(&self, id: ObjId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.objects[id].as_mut() {
            Some(record) if !record.destroyed && !record.destroying => {
                record.destroying = true;
                record.version += 1;
                true
            }
            _ => false,
        }
    }

    /// Completes a destruction: takes the fields for release and leaves a
    /// tombstone (or frees the slot when nothing references it any more).
    pub fn finish_destroy(&self, id: ObjId) -> Vec<Value> {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.objects[id].as_mut() else { return Vec::new() };
        let fields = std::mem::take(&mut record.fields);
        record.destroying = false;
        record.destroyed = true;
        record.version += 1;
        let unreferenced = record.strong == 0;
        inner.live_objects = inner.live_objects.saturating_sub(1);
        if unreferenced {
            inner.objects[id] = None;
            inner.free_objects.push(id);
        }
        fields
    }

    /// Objects that have been allocated and not yet destroyed.
    pub fn live_object_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.live_objects
    }

    /// True once any class has ever been instantiated.
    pub fn has_allocated(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.objects.is_empty()
    }

    /// Ids of every live object, used by the shutdown sweep.
    pub fn live_objects(&self) -> Vec<ObjId> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| match slot {
                Some(r) if !r.destroyed && !r.destroying => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn object_version(&self, id: ObjId) -> Option<u64> {
        let inner = self.inner.lock().unwrap();
        inner.objects[id].as_ref().map(|r| r.version)
    }

    /// Copies the object-graph topology under the lock; the sweep analyses
    /// it without holding the lock.
    pub fn snapshot(&self) -> HeapSnapshot {
        let inner = self.inner.lock().unwrap();
        let mut objects = Vec::new();
        for (id, slot) in inner.objects.iter().enumerate() {
            let Some(record) = slot else { continue };
            if record.destroyed || record.destroying {
                continue;
            }
            let mut obj_edges = Vec::new();
            let mut arr_edges = Vec::new();
            for field in &record.fields {
                match field {
                    Value::Object(o) => obj_edges.push(*o),
                    Value::Array(a) => arr_edges.push(*a),
                    _ => {}
                }
            }
            objects.push(ObjSnap {
                id,
                strong: record.strong,
                version: record.version,
                tracked: record.has_tracked_field,
                obj_edges,
                arr_edges,
            });
        }
        let mut arrays = Vec::new();
        for (id, slot) in inner.arrays.iter().enumerate() {
            let Some(record) = slot else { continue };
            let obj_edges = record
                .items
                .iter()
                .filter_map(|v| match v {
                    Value::Object(o) => Some(*o),
                    _ => None,
                })
                .collect();
            arrays.push(ArrSnap { id, strong: record.strong, obj_edges });
        }
        HeapSnapshot { objects, arrays }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_release_frees_the_slot() {
        let heap = Heap::new();
        let id = heap.alloc_object("A".into(), vec![Value::Int(0)], false);
        assert_eq!(heap.live_object_count(), 1);
        assert_eq!(heap.dec_object(id), DecOutcome::NeedsDestroy);
        assert!(heap.begin_destroy(id));
        heap.finish_destroy(id);
        assert_eq!(heap.live_object_count(), 0);
    }

    #[test]
    fn destroyed_tombstone_survives_until_last_reference() {
        let heap = Heap::new();
        let id = heap.alloc_object("A".into(), vec![], false);
        heap.retain(&Value::Object(id)); // a second binding
        assert!(heap.begin_destroy(id));
        heap.finish_destroy(id);
        // Tombstone remains; both references must drop before the slot frees
        assert!(heap.is_destroyed(id));
        assert_eq!(heap.dec_object(id), DecOutcome::Alive);
        assert_eq!(heap.dec_object(id), DecOutcome::Freed);
    }

    #[test]
    fn snapshot_reports_edges() {
        let heap = Heap::new();
        let a = heap.alloc_object("A".into(), vec![Value::Null], false);
        let b = heap.alloc_object("B".into(), vec![Value::Object(a)], false);
        heap.retain(&Value::Object(a));
        let snap = heap.snapshot();
        let b_snap = snap.objects.iter().find(|o| o.id == b).unwrap();
        assert_eq!(b_snap.obj_edges, vec![a]);
    }
}
