#![no_main]

use libfuzzer_sys::fuzz_target;
use peril_core::routing::topic_matches;

// Input is "<pattern>\n<routing key>".
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Some((pattern, key)) = text.split_once('\n') else {
        return;
    };
    let matched = topic_matches(pattern, key);
    if pattern == "#" {
        assert!(matched);
    }
    if !pattern.contains(['*', '#']) {
        assert_eq!(matched, pattern == key);
    }
});
