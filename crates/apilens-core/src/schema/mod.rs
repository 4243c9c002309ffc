//! API schema files and the catalog that indexes them.
//!
//! Schemas are YAML files in the native format or OpenAPI 3 / Swagger 2
//! documents, which are converted on load.

mod catalog;
mod model;
mod openapi;

pub use catalog::{EndpointMatch, ScanIssue, SchemaCatalog, SchemaSummary};
pub use model::{ApiSchema, Endpoint};
