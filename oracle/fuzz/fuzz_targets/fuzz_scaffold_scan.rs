#![no_main]
use libfuzzer_sys::fuzz_target;
use oracle::differential::OracleParams;
use oracle::scaffold::{scan, Scaffold, ScaffoldTemplate};
use oracle::sentinel::SentinelProtocol;
use std::collections::BTreeSet;

// The scanner and template substitution see user-supplied JavaScript; they
// must reject bad input with an error, never panic on it.
fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);

    let defined = scan::defined_names(&text);
    for name in scan::called_names(&text) {
        let _ = defined.contains(&name);
    }

    let middle = text
        .char_indices()
        .nth(text.chars().count() / 2)
        .map_or(text.len(), |(i, _)| i);
    let (prefix, suffix) = text.split_at(middle);
    let template = ScaffoldTemplate {
        prefix: prefix.to_string(),
        suffix: suffix.to_string(),
    };
    let _ = Scaffold::render(
        &template,
        &OracleParams::default(),
        &SentinelProtocol::default(),
        &BTreeSet::new(),
    );
});
