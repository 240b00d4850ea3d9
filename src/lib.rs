//! Media Recognition Service
//!
//! Submits media to AWS Rekognition for asynchronous analysis, authenticates
//! the SNS completion webhooks, and merges the fetched results into the
//! analysis columns of the owning media records.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
