//! Consumers of finalized results: JUnit XML for CI, a single-file HTML
//! summary, and JSON regression baselines.

pub mod html;
pub mod junit;
pub mod regression;

pub use html::HtmlReporter;
pub use junit::JUnitWriter;
pub use regression::{RegressionDetector, RegressionFinding, RegressionReport};
