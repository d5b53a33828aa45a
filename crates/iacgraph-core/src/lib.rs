pub mod checks;
pub mod compiler;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod graph;
pub mod query;
pub mod report;
pub mod scan;

pub use checks::{all_checks, find_check, CheckDef, CheckResult, Risk, Service, Status, Vulnerability};
pub use compiler::{CompileOptions, TemplateCompiler};
pub use config::{generate_default_config, load_config, ScanConfig};
pub use context::{ScanContext, ScanStats};
pub use document::{load_template, parse_template, TemplateDocument};
pub use error::IacError;
pub use graph::{GraphBackend, NodeId, SnapshotStore, TemplateGraph};
pub use query::QueryLimits;
pub use scan::{plan_units, ScanReport, ScanUnit, Scanner, UnitReport};
