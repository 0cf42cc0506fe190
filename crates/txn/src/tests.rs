#[path = "tests/manager_tests.rs"]
mod manager_tests;
