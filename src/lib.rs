//! Photo findings pipeline
//!
//! Turns field photos into structured findings (objects, damage, materials,
//! open questions) by running a label detector and a multimodal vision model
//! against each photo and merging their results. Photos are processed by
//! background workers that claim records from PostgreSQL one at a time.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
