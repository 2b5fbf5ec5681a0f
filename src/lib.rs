pub mod api;
pub mod coordinator;
pub mod entity;
pub mod hub;
pub mod model;
pub mod optimizer;
pub mod schedule;

pub use api::Error;
