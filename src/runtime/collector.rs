use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::runtime::heap::{Heap, HeapSnapshot};
use crate::runtime::value::ObjId;

const SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Background cycle sweep. The thread snapshots the heap topology under the
/// heap lock, finds components that are unreachable from any external
/// reference and cannot reach a tracked field, and queues them as victims.
/// Destructors are user code, so the interpreter thread drains the victim
/// queue at statement boundaries and at shutdown; each victim carries the
/// object version observed by the sweep so stale candidates are skipped.
pub struct CycleCollector {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    heap: Arc<Heap>,
    shutdown: Mutex<bool>,
    wake: Condvar,
    victims: Mutex<Vec<(ObjId, u64)>>,
    pending: AtomicBool,
}

impl CycleCollector {
    /// Starts the sweep thread; called when the first class object is
    /// created so purely classical programs pay nothing.
    pub fn start(heap: Arc<Heap>) -> Self {
        let shared = Arc::new(Shared {
            heap,
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
            victims: Mutex::new(Vec::new()),
            pending: AtomicBool::new(false),
        });
        let worker = shared.clone();
        let handle = std::thread::Builder::new()
            .name("bloch-cycle-sweep".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn cycle sweep thread");
        Self { shared, handle: Some(handle) }
    }

    pub fn has_victims(&self) -> bool {
        self.shared.pending.load(Ordering::Relaxed)
    }

    pub fn take_victims(&self) -> Vec<(ObjId, u64)> {
        self.shared.pending.store(false, Ordering::Relaxed);
        std::mem::take(&mut *self.shared.victims.lock().unwrap())
    }

    /// Signals cancellation and joins; the thread finishes its current pass
    /// or exits immediately.
    pub fn shutdown(mut self) -> Vec<(ObjId, u64)> {
        *self.shared.shutdown.lock().unwrap() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.take_victims()
    }
}

impl Shared {
    fn run(&self) {
        loop {
            {
                let guard = self.shutdown.lock().unwrap();
                if *guard {
                    return;
                }
                let (guard, _) = self.wake.wait_timeout(guard, SWEEP_INTERVAL).unwrap();
                if *guard {
                    return;
                }
            }
            let snapshot = self.heap.snapshot();
            let found = find_victims(&snapshot);
            if !found.is_empty() {
                self.victims.lock().unwrap().extend(found);
                self.pending.store(true, Ordering::Relaxed);
            }
        }
    }
}

/// Pure analysis over a topology snapshot. A node is externally rooted when
/// it holds more strong references than the heap graph itself explains;
/// everything unreachable from those roots is garbage unless it can reach a
/// tracked field.
pub fn find_victims(snapshot: &HeapSnapshot) -> Vec<(ObjId, u64)> {
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum Node {
        Obj(usize),
        Arr(usize),
    }

    let mut internal: HashMap<Node, usize> = HashMap::new();
    let mut edges: HashMap<Node, Vec<Node>> = HashMap::new();
    let mut strong: HashMap<Node, usize> = HashMap::new();
    let mut tracked: Vec<Node> = Vec::new();

    for obj in &snapshot.objects {
        let node = Node::Obj(obj.id);
        strong.insert(node, obj.strong);
        let mut out = Vec::new();
        for &o in &obj.obj_edges {
            out.push(Node::Obj(o));
        }
        for &a in &obj.arr_edges {
            out.push(Node::Arr(a));
        }
        for &target in &out {
            *internal.entry(target).or_insert(0) += 1;
        }
        edges.insert(node, out);
        if obj.tracked {
            tracked.push(node);
        }
    }
    for arr in &snapshot.arrays {
        let node = Node::Arr(arr.id);
        strong.insert(node, arr.strong);
        let out: Vec<Node> = arr.obj_edges.iter().map(|&o| Node::Obj(o)).collect();
        for &target in &out {
            *internal.entry(target).or_insert(0) += 1;
        }
        edges.insert(node, out);
    }

    // Externally rooted: stack bindings, statics, in-flight temporaries
    let mut queue: VecDeque<Node> = strong
        .iter()
        .filter(|(node, &count)| count > internal.get(node).copied().unwrap_or(0))
        .map(|(node, _)| *node)
        .collect();
    let mut reachable: HashSet<Node> = queue.iter().copied().collect();
    while let Some(node) = queue.pop_front() {
        for &next in edges.get(&node).into_iter().flatten() {
            if strong.contains_key(&next) && reachable.insert(next) {
                queue.push_back(next);
            }
        }
    }

    // Nodes that can reach a tracked field are spared
    let mut reverse: HashMap<Node, Vec<Node>> = HashMap::new();
    for (from, out) in &edges {
        for &to in out {
            reverse.entry(to).or_default().push(*from);
        }
    }
    let mut spared: HashSet<Node> = tracked.iter().copied().collect();
    let mut queue: VecDeque<Node> = tracked.into_iter().collect();
    while let Some(node) = queue.pop_front() {
        for &prev in reverse.get(&node).into_iter().flatten() {
            if spared.insert(prev) {
                queue.push_back(prev);
            }
        }
    }

    snapshot
        .objects
        .iter()
        .filter(|obj| {
            let node = Node::Obj(obj.id);
            !reachable.contains(&node) && !spared.contains(&node)
        })
        .map(|obj| (obj.id, obj.version))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::heap::Heap;
    use crate::runtime::value::Value;

    #[test]
    fn pure_cycle_is_a_victim() {
        let heap = Heap::new();
        let a = heap.alloc_object("A".into(), vec![Value::Null], false);
        let b = heap.alloc_object("A".into(), vec![Value::Null], false);
        // a.next = b; b.next = a; then both stack bindings dropped
        heap.set_field(a, 0, Value::Object(b));
        heap.retain(&Value::Object(b));
        heap.set_field(b, 0, Value::Object(a));
        heap.retain(&Value::Object(a));
        heap.dec_object(a);
        heap.dec_object(b);

        let victims = find_victims(&heap.snapshot());
        let ids: Vec<ObjId> = victims.iter().map(|(id, _)| *id).collect();
        assert!(ids.contains(&a) && ids.contains(&b));
    }

    #[test]
    fn rooted_cycle_is_not_a_victim() {
        let heap = Heap::new();
        let a = heap.alloc_object("A".into(), vec![Value::Null], false);
        let b = heap.alloc_object("A".into(), vec![Value::Null], false);
        heap.set_field(a, 0, Value::Object(b));
        heap.retain(&Value::Object(b));
        heap.set_field(b, 0, Value::Object(a));
        heap.retain(&Value::Object(a));
        // only b's stack binding dropped; a is still rooted
        heap.dec_object(b);

        assert!(find_victims(&heap.snapshot()).is_empty());
    }

    #[test]
    fn tracked_fields_inhibit_reclamation() {
        let heap = Heap::new();
        let a = heap.alloc_object("A".into(), vec![Value::Null], false);
        let b = heap.alloc_object("A".into(), vec![Value::Null], true);
        heap.set_field(a, 0, Value::Object(b));
        heap.retain(&Value::Object(b));
        heap.set_field(b, 0, Value::Object(a));
        heap.retain(&Value::Object(a));
        heap.dec_object(a);
        heap.dec_object(b);

        assert!(find_victims(&heap.snapshot()).is_empty());
    }

    #[test]
    fn cycle_through_an_array_is_found() {
        let heap = Heap::new();
        let a = heap.alloc_object("A".into(), vec![Value::Null], false);
        let arr = heap.alloc_array(vec![Value::Object(a)]);
        heap.retain(&Value::Object(a));
        heap.set_field(a, 0, Value::Array(arr));
        heap.dec_object(a); // stack binding gone; arr's only ref is a.field

        let victims = find_victims(&heap.snapshot());
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].0, a);
    }
}
