use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

use ffnn_fit::{Activation, DerivFlags, NetworkBuilder};

struct CountingAlloc {
    allocs: AtomicUsize,
    reallocs: AtomicUsize,
}

impl CountingAlloc {
    const fn new() -> Self {
        Self {
            allocs: AtomicUsize::new(0),
            reallocs: AtomicUsize::new(0),
        }
    }

    fn reset(&self) {
        self.allocs.store(0, Ordering::Relaxed);
        self.reallocs.store(0, Ordering::Relaxed);
    }

    fn alloc_events(&self) -> usize {
        self.allocs.load(Ordering::Relaxed) + self.reallocs.load(Ordering::Relaxed)
    }
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.reallocs.fetch_add(1, Ordering::Relaxed);
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static ALLOC: CountingAlloc = CountingAlloc::new();

#[test]
fn propagate_does_not_allocate_once_substrates_exist() {
    let mut net = NetworkBuilder::new(3)
        .unwrap()
        .add_layer(6, Activation::Tanh)
        .unwrap()
        .add_layer(4, Activation::Gaussian)
        .unwrap()
        .add_layer(2, Activation::Identity)
        .unwrap()
        .with_substrates(DerivFlags::ALL)
        .build_with_seed(0)
        .unwrap();
    let xs = [[0.1, -0.2, 0.3], [1.0, 0.5, -0.7], [-1.5, 0.0, 2.0]];

    ALLOC.reset();
    for x in &xs {
        net.set_input(x).unwrap();
        net.propagate().unwrap();
        net.propagate_with(DerivFlags::D1).unwrap();
        net.propagate_with(DerivFlags::NONE).unwrap();
    }
    let mut out = [0.0; 2];
    net.outputs_into(&mut out).unwrap();
    let _ = net.cross_second_derivative(1, 2, 5).unwrap();

    assert_eq!(
        ALLOC.alloc_events(),
        0,
        "expected propagation to reuse the allocated substrates"
    );
}
