//! # schema-form - JSON Schema form engine
//!
//! Turns a JSON Schema document into a live tree of nodes that hold form
//! values, validate them, derive computed attributes and notify listeners.
//! Rendering is left to the host; it reads [`NodeSnapshot`]s and calls the
//! mutation API of [`Form`].
//!
//! ## Features
//!
//! - **Schema resolution**: `$ref` expansion, `allOf` merging, tagged `oneOf` variants
//! - **Per-node validation**: compiled once, fallback validator when compilation fails
//! - **Computed properties**: sandboxed expressions with explicit dependencies
//! - **Batched events**: coalesced per path and delivered on [`Form::flush`]
//!
//! ## Quick Start
//!
//! ```rust
//! use schema_form::Form;
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": { "name": { "type": "string", "minLength": 2 } },
//!     "required": ["name"]
//! });
//! let mut form = Form::new(schema, None)?;
//! assert!(!form.is_valid());
//!
//! form.set_value("name", json!("Ada"))?;
//! form.flush();
//! assert!(form.is_valid());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: shared types, paths and errors
//! - **Schema**: normalisation of raw schemas
//! - **Validation / Computed / Cascade**: per-node services
//! - **Node**: the node graph, owned by [`Form`]
//! - **Config**: engine settings

pub mod cascade;
pub mod computed;
pub mod config;
pub mod domain;
pub mod node;
pub mod schema;
pub mod telemetry;
pub mod validation;

pub use cascade::{EventKind, NodeEvent, Subscription};
pub use computed::ComputedKind;
pub use config::EngineSettings;
pub use domain::{
    ComputedSnapshot, FormError, FormResult, NodeError, NodeId, NodeKind, NodePath, NodeResult, NodeSnapshot,
    ReferenceResolver, SchemaError, SchemaResult, ValidationIssue, VARIANT_KEY,
};
pub use node::Form;
pub use schema::ReferenceTable;
