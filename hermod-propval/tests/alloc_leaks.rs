//! Duplicate/drop cycles must return every byte they allocate, including when
//! the copy is aborted part-way through.
//!
//! This binary installs a counting global allocator, so it holds a single
//! test to keep the harness from allocating concurrently on other threads.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
};

use hermod_propval::{AllocBudget, Binary, PropValError, PropValue, SvrEid};

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
}

struct Counting;

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _ = LIVE.try_with(|live| live.set(live.get() + layout.size().cast_signed()));
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _ = LIVE.try_with(|live| live.set(live.get() - layout.size().cast_signed()));
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOCATOR: Counting = Counting;

fn live() -> isize {
    LIVE.with(Cell::get)
}

struct FailAfter(usize);

impl AllocBudget for FailAfter {
    fn admit(&mut self, _bytes: usize) -> Result<(), PropValError> {
        if self.0 == 0 {
            return Err(PropValError::Alloc);
        }
        self.0 -= 1;
        Ok(())
    }
}

fn nested_values() -> Vec<PropValue> {
    vec![
        PropValue::MvString8((0..6).map(|i| format!("value-{i}").into_bytes()).collect()),
        PropValue::MvUnicode(vec![b"a".to_vec(); 4]),
        PropValue::MvBinary((0..5_u8).map(|i| Binary(vec![i; 32])).collect()),
        PropValue::SvrEid(SvrEid {
            bin: Some(Binary(vec![1; 64])),
            ..SvrEid::default()
        }),
        PropValue::Unspecified(Box::new(PropValue::Unspecified(Box::new(
            PropValue::MvBinary(vec![Binary(vec![3; 10]); 3]),
        )))),
    ]
}

#[test]
fn duplicate_and_drop_cycles_do_not_leak() {
    let values = nested_values();

    for value in &values {
        for _ in 0..3 {
            let before = live();
            let dup = value.try_duplicate();
            assert!(dup.is_ok());
            drop(dup);
            assert_eq!(live(), before, "leak after full duplicate of {value:?}");
        }

        for limit in 0..16 {
            let before = live();
            let result = value.duplicate_with(&mut FailAfter(limit));
            drop(result);
            assert_eq!(
                live(),
                before,
                "leak after duplicate failing at admission {limit} of {value:?}"
            );
        }
    }
}
