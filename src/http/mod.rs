//! Request/response snapshots and the network seam.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Request, RequestIdentity, RequestMode, Response};
