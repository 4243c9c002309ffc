//! Directory scanner and in-memory index of schema files.

use super::model::{ApiSchema, Endpoint};
use crate::config::AppConfig;
use crate::{ProbeError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A file that could not be loaded during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanIssue {
    pub path: PathBuf,
    pub message: String,
}

/// Listing entry for one schema.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub base_url: String,
    pub endpoint_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl From<&ApiSchema> for SchemaSummary {
    fn from(schema: &ApiSchema) -> Self {
        Self {
            name: schema.name.clone(),
            version: schema.version.clone(),
            description: schema.description.clone(),
            base_url: schema.base_url.clone(),
            endpoint_count: schema.endpoints.len(),
            source: schema.source.clone(),
        }
    }
}

/// An endpoint found by [`SchemaCatalog::search`].
#[derive(Debug, Clone, Serialize)]
pub struct EndpointMatch {
    pub schema: String,
    pub id: String,
    pub url: String,
    pub endpoint: Endpoint,
}

/// Schemas loaded from one directory tree, keyed by schema name.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    root: PathBuf,
    schemas: BTreeMap<String, ApiSchema>,
    issues: Vec<ScanIssue>,
}

impl SchemaCatalog {
    /// Load every `*.yaml` / `*.yml` file under `dir`.
    ///
    /// A missing directory yields an empty catalog. Files that fail to parse
    /// are recorded as issues and skipped.
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        let mut catalog = Self {
            root: root.clone(),
            ..Self::default()
        };

        if !root.exists() {
            debug!("Schema directory {} does not exist", root.display());
            return Ok(catalog);
        }
        if !root.is_dir() {
            return Err(ProbeError::Config {
                message: format!("schemas path is not a directory: {}", root.display()),
            });
        }

        for entry in WalkDir::new(&root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    catalog.record_issue(path, e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_schema_file(entry.path()) {
                continue;
            }

            match ApiSchema::from_file(entry.path()) {
                Ok(schema) => catalog.add_scanned(schema, entry.path()),
                Err(e) => catalog.record_issue(entry.path().to_path_buf(), e.to_string()),
            }
        }

        info!(
            "Loaded {} schemas from {} ({} issues)",
            catalog.schemas.len(),
            root.display(),
            catalog.issues.len()
        );
        Ok(catalog)
    }

    fn add_scanned(&mut self, schema: ApiSchema, path: &Path) {
        if let Some(existing) = self.schemas.get(&schema.name) {
            let message = format!(
                "duplicate schema name {} (already loaded from {})",
                schema.name,
                existing
                    .source
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
            self.record_issue(path.to_path_buf(), message);
            return;
        }
        debug!("Loaded schema {} from {}", schema.name, path.display());
        self.schemas.insert(schema.name.clone(), schema);
    }

    fn record_issue(&mut self, path: PathBuf, message: String) {
        warn!("Skipping {}: {}", path.display(), message);
        self.issues.push(ScanIssue { path, message });
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn issues(&self) -> &[ScanIssue] {
        &self.issues
    }

    pub fn schemas(&self) -> impl Iterator<Item = &ApiSchema> {
        self.schemas.values()
    }

    /// Add or replace a schema. Returns the previous schema with that name.
    pub fn insert(&mut self, schema: ApiSchema) -> Option<ApiSchema> {
        self.schemas.insert(schema.name.clone(), schema)
    }

    /// Look up a schema by name, exact match first, then case-insensitive.
    pub fn get(&self, name: &str) -> Result<&ApiSchema> {
        self.schemas
            .get(name)
            .or_else(|| {
                self.schemas
                    .values()
                    .find(|s| s.name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| ProbeError::SchemaNotFound {
                name: name.to_string(),
            })
    }

    /// Look up an endpoint by name or `"METHOD path"` within a schema.
    pub fn find_endpoint(&self, schema: &str, endpoint: &str) -> Result<(&ApiSchema, &Endpoint)> {
        let schema = self.get(schema)?;
        let endpoint = schema.endpoint(endpoint)?;
        Ok((schema, endpoint))
    }

    pub fn summaries(&self) -> Vec<SchemaSummary> {
        self.schemas.values().map(SchemaSummary::from).collect()
    }

    /// Case-insensitive substring search over endpoint names, paths and
    /// descriptions. An empty query matches everything.
    pub fn search(&self, query: &str) -> Vec<EndpointMatch> {
        let query = query.trim().to_lowercase();
        let mut matches = Vec::new();

        for schema in self.schemas.values() {
            let schema_hit = schema.name.to_lowercase().contains(&query);
            for endpoint in &schema.endpoints {
                let hit = schema_hit
                    || endpoint.id().to_lowercase().contains(&query)
                    || endpoint.path.to_lowercase().contains(&query)
                    || endpoint
                        .description
                        .as_deref()
                        .map(|d| d.to_lowercase().contains(&query))
                        .unwrap_or(false);
                if hit {
                    matches.push(EndpointMatch {
                        schema: schema.name.clone(),
                        id: endpoint.id(),
                        url: schema.endpoint_url(endpoint),
                        endpoint: endpoint.clone(),
                    });
                }
            }
        }
        matches
    }
}

fn is_schema_file(path: &Path) -> bool {
    let is_settings = path
        .file_name()
        .map(|name| name == AppConfig::CONFIG_FILE_NAME)
        .unwrap_or(false);
    let has_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            AppConfig::SCHEMA_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false);
    has_extension && !is_settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "weather.yaml",
            "name: weather\nbase_url: https://weather.example.com\nendpoints:\n  - name: forecast\n    method: GET\n    path: /forecast\n    description: Daily forecast\n",
        );
        write(
            temp.path(),
            "nested/users.yml",
            "name: users\nbase_url: http://localhost:4000\nendpoints:\n  - {method: GET, path: /users}\n  - method: DELETE\n    path: /users/{id}\n",
        );
        write(temp.path(), "broken.yaml", "name: [unclosed\n");
        write(temp.path(), "zz-dupe.yaml", "name: weather\nbase_url: http://x\n");
        write(temp.path(), "apilens.yaml", "executor:\n  raw_mode: true\n");
        write(temp.path(), "notes.txt", "not a schema");
        temp
    }

    #[test]
    fn test_scan_loads_schemas_and_records_issues() {
        let temp = fixture();
        let catalog = SchemaCatalog::scan(temp.path()).unwrap();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("weather").is_ok());
        assert!(catalog.get("USERS").is_ok());

        let issue_files: Vec<_> = catalog
            .issues()
            .iter()
            .map(|i| i.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(issue_files, vec!["broken.yaml", "zz-dupe.yaml"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let catalog = SchemaCatalog::scan(temp.path().join("nope")).unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.issues().is_empty());
    }

    #[test]
    fn test_find_endpoint_errors() {
        let temp = fixture();
        let catalog = SchemaCatalog::scan(temp.path()).unwrap();

        let (schema, endpoint) = catalog.find_endpoint("users", "DELETE /users/{id}").unwrap();
        assert_eq!(schema.name, "users");
        assert_eq!(endpoint.path, "/users/{id}");

        assert!(matches!(
            catalog.find_endpoint("billing", "x"),
            Err(ProbeError::SchemaNotFound { .. })
        ));
        assert!(matches!(
            catalog.find_endpoint("users", "POST /users"),
            Err(ProbeError::EndpointNotFound { .. })
        ));
    }

    #[test]
    fn test_summaries_and_search() {
        let temp = fixture();
        let catalog = SchemaCatalog::scan(temp.path()).unwrap();

        let summaries = catalog.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].name, "weather");
        assert_eq!(summaries[1].endpoint_count, 1);

        let found = catalog.search("daily");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://weather.example.com/forecast");

        assert_eq!(catalog.search("users").len(), 2);
        assert_eq!(catalog.search("").len(), 3);
    }
}
