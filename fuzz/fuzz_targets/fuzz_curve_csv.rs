#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Whatever parses must survive a render and parse again unchanged.
    if let Ok(rows) = bmcfan_config::parse_curve_csv(data) {
        let bytes = bmcfan_config::render_curve_csv(rows.iter().copied()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let again = bmcfan_config::parse_curve_csv(&text).unwrap();
        assert_eq!(rows, again);
    }
});
