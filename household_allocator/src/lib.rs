pub mod allocator;
pub mod config;
pub mod data_loader;
pub mod distributor;
pub mod education;
pub mod error;
pub mod models;
pub mod output_writer;
pub mod pool;
pub mod profile_library;
pub mod rebalance;
pub mod report;
pub mod residents;

pub use allocator::{AllocationRun, SectionAllocator, SectionOutcome};
pub use config::{AllocationConfig, PayloadMode, RunConfig, ServiceOrder, SummarySchema};
pub use data_loader::{BuildingCatalog, DataLoader};
pub use error::AllocatorError;
pub use models::{
    Building, BuildingAllocation, BuildingSummary, CensusSection, EducationLevel, HouseholdCategory,
    SectionAllocation, SummaryGroup,
};
pub use output_writer::{OutputWriter, WrittenOutputs};
pub use profile_library::ProfileLibrary;
pub use rebalance::rebalance;
pub use report::{RunReport, SectionWarning, SkipReason};
