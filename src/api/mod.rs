//! API module - operator HTTP surface

pub mod routes;
