//! # oas-enforcer
//!
//! A crate for validating OpenAPI v2/v3 definitions and enforcing values
//! against their schemas. A raw definition is normalized into a tree of
//! enforcer instances by a validator driven walker; Schema nodes of that
//! tree deserialize, serialize, validate, populate and randomize user
//! values through an extensible `(type, format)` codec registry.
//!
//! ## Example:
//!
//! ```rust
//! use oas_enforcer::{Enforcer, Value};
//! use serde_json::json;
//!
//! let enforcer = Enforcer::v3();
//! let schema = enforcer
//!     .schema(&json!({"type": "string", "format": "date"}))
//!     .into_result()
//!     .expect("a valid schema definition");
//! let date = schema
//!     .deserialize(&Value::from("2000-01-01"))
//!     .into_result()
//!     .expect("a valid date");
//! assert!(matches!(date, Value::Date(_)));
//! ```
#![warn(
    clippy::doc_markdown,
    clippy::redundant_closure,
    clippy::explicit_iter_loop,
    clippy::match_same_arms,
    clippy::needless_borrow,
    clippy::print_stdout,
    clippy::trivially_copy_pass_by_ref,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]
mod components;
mod context;
mod data_types;
mod enforcer;
mod exception;
mod normalizer;
mod paths;
mod schema;
mod validator;
mod value;

pub use context::{ComponentId, RefParser, SpecVersion};
pub use data_types::{
    CodecContext, DataTypeDefinition, DataTypeRegistry, DefineError, PrimitiveKind,
};
pub use enforcer::{Document, Enforcer};
pub use exception::Exception;
pub use paths::PathChunk;
pub use schema::{
    Discriminated, EnforcerData, OptionsError, Outcome, PopulateOptions, RandomOptions,
    Replacement, Schema,
};
pub use value::{deep_equal, extract_value, formalize, Constructor, DefinitionType, Map, Value};
