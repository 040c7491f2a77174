//! Fuzz target for pipeline config parsing.

#![no_main]

use ar_config::{validate_pipeline, PipelineConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = PipelineConfig::parse_json(s) {
            let _ = validate_pipeline(&config);
        }
    }
});
