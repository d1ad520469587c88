pub mod backoff;
pub mod dashboard;
pub mod supervisor;

pub use backoff::{Backoff, BackoffPolicy};
pub use dashboard::DashboardLauncher;
pub use supervisor::{CycleReport, ResilientLoop};
