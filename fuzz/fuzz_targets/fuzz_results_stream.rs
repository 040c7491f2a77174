//! Fuzz target for the results stream reader and record decoder.
//!
//! The stream comes from an external process; malformed input must end in an
//! error, never a panic or an unbounded loop.

#![no_main]

use ar_core::results::{decode_record, ResultsReader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = ResultsReader::new(data);
    while let Ok(Some(object)) = reader.next_object() {
        if decode_record(object).is_err() {
            break;
        }
    }
});
