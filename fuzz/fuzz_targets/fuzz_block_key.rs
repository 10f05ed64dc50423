//! Fuzz target for block key parsing.
//!
//! Arbitrary strings must parse or fail cleanly, and every parsed key must
//! print back to the same lowercase hex.

#![no_main]

use keyfetch_core::fetch::BlockKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(key) = data.parse::<BlockKey>() {
        assert_eq!(key.to_string(), data.to_ascii_lowercase());
    }
});
