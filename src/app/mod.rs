mod adapter_client;
mod checker;
pub mod component_factory;
mod event_hooks;
mod job;
#[cfg(test)]
pub(crate) mod mocks;
mod report_converter;
mod scan_all;
mod scan_controller;
mod scan_job;
mod scanner_controller;
mod services;
mod stores;

pub use adapter_client::{AdapterClient, AdapterClientError, ClientPool, DEFAULT_REFRESH_AFTER_SECS};
pub use checker::Checker;
pub use event_hooks::{AUTO_SCAN_KEY, ArtifactEvent, ArtifactEventHandler, JobHookDispatcher};
pub use job::{HookEvent, Job, JobContext, JobError};
pub use report_converter::ReportConverter;
pub use scan_all::{ScanAll, ScanAllSummary};
pub use scan_controller::{
    SCAN_HOOK_PATH, ScanController, ScanControllerDeps, ScanOption, ScanSettings, scan_hook_url,
    track_id_of_hook_url,
};
pub use scan_job::{ScanJob, ScanJobSettings};
pub use scanner_controller::{PROJECT_SCANNER_KEY, RegistrationOptions, ScannerController};
pub use services::{
    AccessoryStore, ArtifactController, JobService, ProjectMetadataStore, RobotAccountManager,
    RobotRequest, WalkAction, walk,
};
pub use stores::{RegistrationStore, ReportStore, VulnerabilityRecordStore};
