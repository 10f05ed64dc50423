//! Fuzz target for the ordered list.
//!
//! Arbitrary operation sequences must never panic and must leave the list
//! agreeing with a `VecDeque` model after every step.

#![no_main]

use std::collections::VecDeque;

use arbitrary::Arbitrary;
use keyfetch_core::list::{NodeHandle, OrderedList};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Push,
    Unshift,
    Pop,
    Shift,
    ShiftN(u8),
    PopN(u8),
    Remove(u8),
    RemoveForeign,
    Clone,
    Clear,
}

fuzz_target!(|ops: Vec<Op>| {
    let mut list = OrderedList::new();
    let mut model: VecDeque<u32> = VecDeque::new();
    let mut handles: Vec<(u32, NodeHandle)> = Vec::new();
    let mut other = OrderedList::new();
    let stranger = other.push(0u32);
    let mut next = 0u32;

    for op in ops {
        match op {
            Op::Push => {
                handles.push((next, list.push(next)));
                model.push_back(next);
                next += 1;
            }
            Op::Unshift => {
                handles.push((next, list.unshift(next)));
                model.push_front(next);
                next += 1;
            }
            Op::Pop => assert_eq!(list.pop(), model.pop_back()),
            Op::Shift => assert_eq!(list.shift(), model.pop_front()),
            Op::ShiftN(n) => {
                let taken: Vec<_> = list.shift_n(n as usize).into_iter().collect();
                let expected: Vec<_> = (0..n).filter_map(|_| model.pop_front()).collect();
                assert_eq!(taken, expected);
            }
            Op::PopN(n) => {
                let taken: Vec<_> = list.pop_n(n as usize).into_iter().collect();
                let split = model.len().saturating_sub(n as usize);
                let expected: Vec<_> = model.split_off(split).into_iter().collect();
                assert_eq!(taken, expected);
            }
            Op::Remove(i) => {
                if handles.is_empty() {
                    continue;
                }
                let (value, handle) = handles.swap_remove(i as usize % handles.len());
                let removed = list.remove(handle).expect("own handle is never foreign");
                match model.iter().position(|v| *v == value) {
                    Some(pos) => {
                        model.remove(pos);
                        assert_eq!(removed, Some(value));
                    }
                    None => assert_eq!(removed, None),
                }
            }
            Op::RemoveForeign => {
                assert!(list.remove(stranger).is_err());
            }
            Op::Clone => {
                let copy = list.clone();
                assert!(copy.iter().eq(model.iter()));
            }
            Op::Clear => {
                list.clear();
                model.clear();
            }
        }
        assert_eq!(list.len(), model.len());
        assert_eq!(list.is_empty(), list.head().is_none());
        assert!(list.iter().eq(model.iter()));
    }
});

