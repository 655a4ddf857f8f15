#![no_main]
use libfuzzer_sys::fuzz_target;
use oracle::TargetProfile;

// Profile documents come from disk; any JSON must either validate or fail
// with a ConfigError.
fuzz_target!(|data: &[u8]| {
    if let Ok(json) = std::str::from_utf8(data) {
        if let Ok(profile) = TargetProfile::from_json(json) {
            assert!(!profile.crash_tests().is_empty());
            let _ = profile.scaffold().wrap("return 0;");
        }
    }
});
