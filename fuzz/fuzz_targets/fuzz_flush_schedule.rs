#![no_main]

//! Random writes, flush requests and timer ticks against a small runtime.
//! However the operations interleave, the pending flag is set exactly while
//! one deferred flush is queued, and an effect runs only when its watched
//! value changed.

use std::cell::Cell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use hookrt_core::testing::ManualTimer;
use hookrt_core::{Runtime, deps};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Write { cell: bool, value: u8 },
    Request,
    Tick,
    FlushNow,
}

fuzz_target!(|ops: Vec<Op>| {
    let timer = Rc::new(ManualTimer::new());
    let rt = Runtime::new(timer.clone());
    let a = rt.create_cell(0u8);
    let b = rt.create_cell(0u8);

    let runs = Rc::new(Cell::new(0u32));
    let last_seen = Rc::new(Cell::new(None::<u8>));
    let (r, seen, reader) = (Rc::clone(&runs), Rc::clone(&last_seen), a.clone());
    rt.register_effect(
        move || {
            let now = reader.get();
            assert_ne!(seen.get(), Some(now), "effect re-ran on unchanged value");
            seen.set(Some(now));
            r.set(r.get() + 1);
        },
        deps![a],
    );

    for op in ops.into_iter().take(512) {
        match op {
            Op::Write { cell, value } => {
                if cell {
                    a.set(value);
                } else {
                    b.set(value);
                }
            }
            Op::Request => {
                rt.request_flush();
            }
            Op::Tick => {
                timer.run_pending();
            }
            Op::FlushNow => {
                let _ = rt.flush_now();
            }
        }
        assert!(timer.pending() <= 1, "more than one deferred flush queued");
        assert_eq!(
            rt.is_flush_pending(),
            timer.pending() == 1,
            "pending flag out of step with the timer queue"
        );
    }
});
