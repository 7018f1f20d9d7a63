// Library for tests to access modules

pub mod config;
pub mod error;
pub mod kpi;
pub mod models;
pub mod roller;
pub mod routes;
pub mod scheduler;
pub mod snapshot;
pub mod warehouse;
