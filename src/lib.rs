//! FigStyle Core - Publication Figure Restyling Engine
//!
//! # The Six Laws (Non-Negotiable)
//! 1. SVG Is Truth
//! 2. Templates Are Contracts
//! 3. Classification Is Heuristic, Transformation Is Not
//! 4. Deterministic Output
//! 5. Manifests Enable Incremental Runs
//! 6. Originals Are Never Modified

pub mod batch;
pub mod classify;
pub mod color;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod matplotlib;
pub mod report;
pub mod store;
pub mod template;
pub mod transform;

pub use batch::{BatchEngine, BatchOptions, BatchOutcome, BatchRequest, BatchTarget, OutputFormat};
pub use color::{Color, ColorMapping, Palette};
pub use document::{parse_svg, serialize, Document};
pub use error::{Error, Result};
pub use template::{Template, TemplateRegistry};
pub use transform::{analyze, apply, ApplyOptions, Outcome, TransformationRecord};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
