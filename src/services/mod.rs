pub mod backoff;
pub mod label_detector;
pub mod orchestrator;
pub mod provider_error;
pub mod storage;
pub mod vision;
pub mod worker;
