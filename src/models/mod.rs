pub mod api;
pub mod findings;
pub mod photo;
