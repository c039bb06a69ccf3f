pub mod adapter;
pub mod artifact;
pub mod errors;
pub mod job;
pub mod mime;
pub mod query;
pub mod registration;
pub mod report;
