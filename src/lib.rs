//! Offline cache proxy for a multi-tenant web client.
//!
//! Requests are routed to network-first or cache-first strategies over
//! versioned cache stores. Failed writes are queued and replayed on the next
//! background sync.

pub mod cache;
pub mod config;
pub mod db;
pub mod event;
pub mod http;
pub mod worker;

#[cfg(test)]
mod test_utils;
