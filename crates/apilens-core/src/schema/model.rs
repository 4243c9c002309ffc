//! API schema file model.
//!
//! ```yaml
//! name: petstore
//! version: "1.0"
//! base_url: https://petstore.example.com/v1
//! headers:
//!   Accept: application/json
//! endpoints:
//!   - name: list_pets
//!     method: GET
//!     path: /pets
//!     params:
//!       limit: "10"
//!   - name: get_pet
//!     method: GET
//!     path: /pets/{petId}
//! ```

use super::openapi;
use crate::network::{HttpMethod, HttpRequest};
use crate::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A named collection of endpoints sharing a base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "baseUrl")]
    pub base_url: String,
    /// Sent with every endpoint; endpoint headers win on conflict.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// File the schema was loaded from.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// One operation of an API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub method: HttpMethod,
    /// Relative to the schema base URL; `{name}` segments are path parameters.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Default query parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Example request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Documented or inferred response structure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl Endpoint {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            name: None,
            method,
            path: path.into(),
            description: None,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            response: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Identifier used for lookups: the name, or `"METHOD path"`.
    pub fn id(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{} {}", self.method, self.path),
        }
    }

    /// Whether `key` names this endpoint, by name or by `"METHOD path"`.
    pub fn matches(&self, key: &str) -> bool {
        let key = key.trim();
        if self.name.as_deref() == Some(key) {
            return true;
        }
        match key.split_once(char::is_whitespace) {
            Some((method, path)) => {
                method.eq_ignore_ascii_case(self.method.as_str()) && path.trim() == self.path
            }
            None => false,
        }
    }

    /// Names of `{param}` segments in the path.
    pub fn path_params(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut rest = self.path.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            names.push(rest[start + 1..start + len].to_string());
            rest = &rest[start + len + 1..];
        }
        names
    }
}

impl ApiSchema {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            description: None,
            base_url: base_url.into(),
            headers: BTreeMap::new(),
            endpoints: Vec::new(),
            source: None,
        }
    }

    /// Load a schema file in the native format, OpenAPI 3 or Swagger 2.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ProbeError::io_with_path(e, path))?;
        let document: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| ProbeError::yaml_with_path(e, path))?;

        let mut schema = Self::from_document(document, path.file_stem().and_then(|s| s.to_str()))
            .map_err(|e| match e {
                ProbeError::Yaml { message, .. } => ProbeError::Yaml {
                    message,
                    path: Some(path.to_path_buf()),
                },
                other => other,
            })?;
        schema.source = Some(path.to_path_buf());
        Ok(schema)
    }

    /// Parse a schema from YAML (JSON is valid YAML too).
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        Self::from_document(document, None)
    }

    fn from_document(document: serde_yaml::Value, fallback_name: Option<&str>) -> Result<Self> {
        let schema = if document.get("openapi").is_some() {
            debug!("Converting OpenAPI 3 document");
            openapi::from_openapi3(document, fallback_name)?
        } else if document.get("swagger").is_some() {
            debug!("Converting Swagger 2 document");
            openapi::from_swagger2(document, fallback_name)?
        } else {
            serde_yaml::from_value(document)?
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProbeError::validation("name", "schema name must not be empty"));
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.path.is_empty() {
                return Err(ProbeError::validation(
                    "path",
                    format!("endpoint {} has an empty path", endpoint.id()),
                ));
            }
            if !seen.insert(endpoint.id()) {
                return Err(ProbeError::validation(
                    "endpoints",
                    format!("duplicate endpoint {} in schema {}", endpoint.id(), self.name),
                ));
            }
        }
        Ok(())
    }

    /// Find an endpoint by name or `"METHOD path"`.
    pub fn endpoint(&self, key: &str) -> Result<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.matches(key))
            .ok_or_else(|| ProbeError::EndpointNotFound {
                schema: self.name.clone(),
                endpoint: key.to_string(),
            })
    }

    /// Full URL of `endpoint`, without query parameters.
    pub fn endpoint_url(&self, endpoint: &Endpoint) -> String {
        if endpoint.path.starts_with("http://") || endpoint.path.starts_with("https://") {
            return endpoint.path.clone();
        }
        let base = self.base_url.trim_end_matches('/');
        if endpoint.path.starts_with('/') {
            format!("{}{}", base, endpoint.path)
        } else {
            format!("{}/{}", base, endpoint.path)
        }
    }

    /// Build a request for `endpoint` from the schema defaults.
    pub fn to_request(&self, endpoint: &Endpoint) -> HttpRequest {
        self.to_request_with(endpoint, &BTreeMap::new())
    }

    /// Build a request, substituting `{name}` path segments from `path_params`.
    pub fn to_request_with(
        &self,
        endpoint: &Endpoint,
        path_params: &BTreeMap<String, String>,
    ) -> HttpRequest {
        let mut url = self.endpoint_url(endpoint);
        for (name, value) in path_params {
            url = url.replace(&format!("{{{}}}", name), value);
        }

        let mut request = HttpRequest::new(endpoint.method, url);
        request.headers = self.headers.clone();
        request.headers.extend(endpoint.headers.clone());
        if !endpoint.params.is_empty() {
            request.params = Some(endpoint.params.clone());
        }
        request.body = endpoint.body.clone();
        request
    }

    /// Replace the endpoint with the same id, or append it.
    /// Returns true if an existing endpoint was replaced.
    pub fn upsert_endpoint(&mut self, endpoint: Endpoint) -> bool {
        let id = endpoint.id();
        match self.endpoints.iter_mut().find(|e| e.id() == id) {
            Some(existing) => {
                *existing = endpoint;
                true
            }
            None => {
                self.endpoints.push(endpoint);
                false
            }
        }
    }

    /// Write the schema as YAML in the native format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ProbeError::io_with_path(e, parent))?;
            }
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|e| ProbeError::io_with_path(e, path))?;
        debug!("Saved schema {} to {}", self.name, path.display());
        Ok(())
    }
}
