// tests/support/mod.rs

pub mod server;
