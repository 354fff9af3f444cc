//! Query rendering, fingerprinting, context diff and environment
//! promotion: the orchestration core (spec.md §2 components D, E, G, H).

pub mod diff;
pub mod driver;
pub mod engine;
pub mod fingerprint;
pub mod promote;
pub mod render;
pub mod validate;

pub use diff::{build_context_diff, ContextDiff};
pub use driver::{EngineDriver, EngineTransaction, StateReader, StateWriter};
pub use engine::PlanEngine;
pub use fingerprint::compute_fingerprint;
pub use render::{referenced_table_names, QueryRenderer, RenderContext, RenderWindow};
