pub mod schedule;
pub mod service;
pub mod store;
pub mod transitions;
