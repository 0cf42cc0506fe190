#[path = "tests/helpers.rs"]
mod helpers;
#[path = "tests/read_tests.rs"]
mod read_tests;
#[path = "tests/manifest_tests.rs"]
mod manifest_tests;
#[path = "tests/compaction_tests.rs"]
mod compaction_tests;
