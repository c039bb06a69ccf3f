//! In-process implementations of the persistence and registry seams.

mod accessories;
mod artifacts;
mod project_metadata;
mod registrations;
mod reports;
mod robots;
mod vulnerabilities;

pub use accessories::{Accessory, InMemoryAccessoryStore, content_digest};
pub use artifacts::InMemoryArtifactStore;
pub use project_metadata::InMemoryProjectMetadataStore;
pub use registrations::InMemoryRegistrationStore;
pub use reports::InMemoryReportStore;
pub use robots::{DEFAULT_ROBOT_PREFIX, InMemoryRobotAccountManager};
pub use vulnerabilities::InMemoryVulnerabilityRecordStore;
