//! Schemaless translation engine
//!
//! Maps irregular JSON (or YAML) documents onto fixed target standards using
//! learned path templates. A template is learned once per input shape, either
//! inferred from a known output or proposed by an external generator, and is
//! then reused from the cache for every document of the same shape.
//!
//! The engine is split into:
//! - `path`: the path language (`secret.version.value`, `alerts.#.title`)
//! - `shape`: value-free skeletons and shape tokens
//! - `apply`: forward application of a template to a source
//! - `reverse`: path inference from sample outputs and `place_value`
//! - `single_flight`: cache-backed de-duplication of generation calls
//! - `translator`: the orchestrator tying it all together

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod apply;
pub mod cache;
pub mod config;
pub mod errors;
pub mod generation;
pub mod input;
pub mod path;
pub mod retry;
pub mod reverse;
pub mod shape;
pub mod single_flight;
pub mod store;
pub mod translator;

pub use apply::{
    ApplyOptions, ListAlignment, TargetSpec, Template, TemplateApplier, UNMAPPED_KEY,
    apply_template,
};
pub use cache::{Cache, ChunkedCache, MemoryCache};
pub use config::SchemalessConfig;
pub use errors::{ErrorCategory, Result, SchemalessError};
pub use generation::{GenerationRequest, TemplateGenerator};
pub use input::parse_input;
pub use path::{ListSelector, PathExpr, Resolved, Segment};
pub use reverse::{InferredTemplate, infer_paths, infer_template, place_value};
pub use shape::{ShapeToken, shape_token, skeleton, template_key};
pub use single_flight::SingleFlight;
pub use store::{MemorySampleStore, MemoryStandardStore, SampleStore, StandardStore};
pub use translator::{TranslateRequest, Translator};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
