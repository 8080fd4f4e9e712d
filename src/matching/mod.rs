pub mod select;
pub mod service;
pub mod store;
