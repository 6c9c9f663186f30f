pub mod handler;
pub mod liveness;
pub mod registry;
