//! device-registry: shared view of the gateway's Active sensor devices

mod types;
pub use types::*;

mod registry;
pub use registry::Registry;
