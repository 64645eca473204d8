//! Application services: the data source and the published snapshot service.

pub mod data_source;
pub mod error;
pub mod kits;
pub mod repos;
pub mod snapshot_service;
