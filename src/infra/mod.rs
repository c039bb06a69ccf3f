mod client_pool;
mod component_factory_impl;
mod http_adapter_client;
mod job_log_layer;
mod local_job_runtime;
pub mod memory;

pub use client_pool::{HttpClientPool, PoolConfig};
pub use component_factory_impl::ConcreteComponentFactory;
pub use http_adapter_client::{Authorizer, DEFAULT_REQUEST_TIMEOUT, HttpAdapterClient};
pub use job_log_layer::{JOB_ID_FIELD, JobLogBuffer, JobLogLayer};
pub use local_job_runtime::{DEFAULT_MAX_ATTEMPTS, LocalJobService};
