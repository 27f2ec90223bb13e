#![no_main]

use arbitrary::Arbitrary;
use courier::transport::memory::topic_matches;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    pattern: Vec<Word>,
    key: Vec<String>,
}

#[derive(Debug, Arbitrary)]
enum Word {
    Star,
    Hash,
    Literal(String),
}

fuzz_target!(|input: FuzzInput| {
    let pattern: Vec<String> = input
        .pattern
        .iter()
        .take(16)
        .map(|w| match w {
            Word::Star => "*".to_string(),
            Word::Hash => "#".to_string(),
            Word::Literal(s) => s.replace('.', ""),
        })
        .collect();
    let key: Vec<String> = input
        .key
        .iter()
        .take(16)
        .map(|s| s.replace('.', ""))
        .collect();
    let pattern = pattern.join(".");
    let key = key.join(".");

    let matched = topic_matches(&pattern, &key);

    // Ключ совпадает сам с собой, `#` совпадает со всем
    assert!(topic_matches(&key, &key) || key.contains('*') || key.contains('#'));
    assert!(topic_matches("#", &key));
    if pattern == key && !key.contains('*') && !key.contains('#') {
        assert!(matched);
    }
});
