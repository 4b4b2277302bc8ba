//! Data-access and aggregation layer of the DoIt neighborhood task
//! marketplace, with a thin JSON API on top.

#[macro_use]
extern crate rocket;

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod guards;
pub mod images;
pub mod models;
pub mod routes;
pub mod server;
pub mod services;
pub mod utils;

pub use error::{ServiceError, ServiceResult};
pub use server::build;
pub use services::Marketplace;
