#![no_main]

use libfuzzer_sys::fuzz_target;
use racimo::config::DetectionConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing and strategy construction must reject, never panic
        if let Ok(config) = DetectionConfig::from_toml_str(input) {
            let _ = config.build();
        }
    }
});
