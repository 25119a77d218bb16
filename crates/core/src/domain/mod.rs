pub mod collection;
pub mod route;
pub mod schema;
pub mod service;
