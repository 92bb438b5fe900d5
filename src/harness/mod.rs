pub mod suite;
pub mod types;

pub use suite::{SuiteRun, run_suite, select};
pub use types::{HarnessConfig, HarnessError, HarnessResult};
