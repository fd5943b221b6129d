// Usage metering: per-user daily quota records, the gate that reserves and
// settles metered calls, and the usage dashboard endpoint.

pub mod gate;
pub mod handlers;
pub mod models;
pub mod postgres;
pub mod store;
