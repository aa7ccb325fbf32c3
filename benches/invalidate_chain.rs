//! Measures the invalidation cascade over a linear dependency chain.

use std::sync::{Arc, Weak};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use parking_lot::Mutex;

use computed_flow::{
    AnyComputed, CancellationToken, Computed, ComputeContext, ComputeError, ComputedOptions,
    Input, LTag,
};

/// A chain link whose cache slot holds the node weakly, so dropping the bench
/// output frees the whole chain.
#[derive(Clone)]
struct Link {
    index: usize,
    slot: Arc<Mutex<Weak<Computed<Link>>>>,
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Eq for Link {}

impl std::hash::Hash for Link {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Link({})", self.index)
    }
}

impl Input for Link {
    type Value = u64;

    fn invoke(
        &self,
        _used_by: Option<Arc<dyn AnyComputed>>,
        _ctx: Option<&Arc<ComputeContext>>,
        _cancel: &CancellationToken,
    ) -> Result<Arc<Computed<Self>>, ComputeError> {
        unreachable!("the bench never recomputes")
    }

    fn try_get_cached(&self, ltag: LTag) -> Option<Arc<Computed<Self>>> {
        self.slot.lock().upgrade().filter(|node| node.ltag() == ltag)
    }
}

fn build_chain(length: usize) -> Vec<Arc<Computed<Link>>> {
    let mut nodes: Vec<Arc<Computed<Link>>> = Vec::with_capacity(length);
    for index in 0..length {
        let link = Link {
            index,
            slot: Arc::new(Mutex::new(Weak::new())),
        };
        let node = Computed::new_computing(link.clone(), LTag::generate(), ComputedOptions::NONE);
        *link.slot.lock() = Arc::downgrade(&node);
        if let Some(previous) = nodes.last() {
            node.add_used(previous.clone() as Arc<dyn AnyComputed>)
                .unwrap();
        }
        assert!(node.try_set_output(Ok(index as u64)));
        nodes.push(node);
    }
    nodes
}

fn bench_invalidate_chain(c: &mut Criterion) {
    for length in [100usize, 1000] {
        c.bench_function(&format!("invalidate_chain/{length}"), |b| {
            b.iter_batched(
                || build_chain(length),
                |nodes| {
                    assert!(nodes[0].invalidate());
                    nodes
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_invalidate_chain);
criterion_main!(benches);
