#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse errors and validation errors are fine; panics are not.
    if let Ok(cfg) = toml::from_str::<bmcfan_config::Config>(data) {
        if cfg.validate().is_ok() {
            let speeds = cfg.scan_speeds();
            assert!(speeds.iter().all(|s| *s <= 100));
        }
    }
});
