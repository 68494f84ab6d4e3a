// Library root for the shared data layer: record types, the path-addressed
// document store, the typed ledger over it, and the pure analytics that the
// app and server crates build on.

pub mod analytics;
pub mod attendance;
pub mod config;
pub mod export;
pub mod farming;
pub mod ledger;
pub mod model;
pub mod paths;
pub mod protocol;
pub mod store;
