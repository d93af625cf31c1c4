#![no_main]

//! Random subscribe / unsubscribe / dispatch sequences, including handlers
//! that cancel themselves or siblings mid-dispatch. Host registration must
//! always match list occupancy, and a once-handler must never fire twice.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbitrary::Arbitrary;
use hookrt_core::testing::RecordingSource;
use hookrt_core::{EventMultiplexer, Unsubscribe};
use libfuzzer_sys::fuzz_target;

const KEYS: u8 = 4;

#[derive(Debug, Arbitrary)]
enum Op {
    On { keys: Vec<u8> },
    Once { keys: Vec<u8> },
    /// Subscribe a handler that cancels subscription `victim` when invoked.
    Canceller { key: u8, victim: u8 },
    Unsubscribe { index: u8 },
    Dispatch { key: u8 },
}

type Mux = EventMultiplexer<u8, ()>;
type Subs = Rc<RefCell<Vec<Unsubscribe<u8, ()>>>>;

fuzz_target!(|ops: Vec<Op>| {
    let source = Rc::new(RecordingSource::new());
    let mux: Mux = EventMultiplexer::new(source.clone());
    let subs: Subs = Rc::new(RefCell::new(Vec::new()));
    let once_counters: RefCell<Vec<Rc<Cell<u32>>>> = RefCell::new(Vec::new());

    for op in ops.into_iter().take(256) {
        match op {
            Op::On { keys } => {
                let keys = keys.into_iter().take(8).map(|k| k % KEYS);
                let cancel = mux.on(keys, |_, _| {});
                subs.borrow_mut().push(cancel);
            }
            Op::Once { keys } => {
                let keys = keys.into_iter().take(8).map(|k| k % KEYS);
                let fired = Rc::new(Cell::new(0));
                let f = Rc::clone(&fired);
                let cancel = mux.once(keys, move |_, _| f.set(f.get() + 1));
                once_counters.borrow_mut().push(fired);
                subs.borrow_mut().push(cancel);
            }
            Op::Canceller { key, victim } => {
                let list = Rc::clone(&subs);
                let cancel = mux.on([key % KEYS], move |_, _| {
                    let target = {
                        let list = list.borrow();
                        if list.is_empty() {
                            None
                        } else {
                            Some(list[victim as usize % list.len()].clone())
                        }
                    };
                    if let Some(target) = target {
                        target.unsubscribe();
                    }
                });
                subs.borrow_mut().push(cancel);
            }
            Op::Unsubscribe { index } => {
                let target = {
                    let list = subs.borrow();
                    if list.is_empty() {
                        None
                    } else {
                        Some(list[index as usize % list.len()].clone())
                    }
                };
                if let Some(target) = target {
                    target.unsubscribe();
                }
            }
            Op::Dispatch { key } => {
                mux.dispatch(&(key % KEYS), &());
            }
        }

        for k in 0..KEYS {
            assert_eq!(source.is_registered(&k), mux.subscriber_count(&k) > 0);
        }
        for fired in once_counters.borrow().iter() {
            assert!(fired.get() <= 1);
        }
    }
});
