#![no_main]

use jobwatch_observer::{OutputPatternSet, PatternKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    let patterns = OutputPatternSet::standard();
    if let Some(found) = patterns.match_line(&line) {
        assert!(!line.trim().is_empty());
        assert!(!found.pattern.is_empty());
        if found.kind == PatternKind::Success {
            assert!(patterns.match_line(&line.to_uppercase()).is_some());
        }
    }
});
