//! Operation catalogue - load operation declarations from YAML or JSON
//!
//! Every declaration is validated once when the catalogue is loaded; lookups
//! hand out shared descriptors.

use super::descriptor::{OperationDeclaration, OperationDescriptor};
use crate::decode::ErrorTypes;
use crate::error::{BuildError, Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Embedded container-registry catalogue (compiled into the binary)
const CONTAINER_REGISTRY: &str = include_str!("../resources/container_registry.yaml");

/// Root structure of a catalogue file
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    operations: Vec<OperationDeclaration>,
}

/// Validated operations keyed by name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    operations: BTreeMap<String, Arc<OperationDescriptor>>,
}

static BUILTIN: OnceLock<Catalog> = OnceLock::new();

/// Error body returned by the registry (`{"errors": [...]}`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistryErrors {
    pub errors: Vec<RegistryErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistryErrorInfo {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub detail: Option<Value>,
}

/// Error tags used by the embedded catalogue
pub fn registry_error_types() -> ErrorTypes {
    ErrorTypes::default()
        .register::<RegistryErrors>("acr_error")
        .register::<RegistryErrors>("not_found")
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedded container-registry catalogue (parsed on first access)
    pub fn builtin() -> &'static Catalog {
        BUILTIN.get_or_init(|| {
            Catalog::from_yaml_str(CONTAINER_REGISTRY)
                .unwrap_or_else(|e| panic!("Failed to parse embedded catalogue: {}", e))
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid catalogue: {e}")))?;
        Self::from_declarations(file.operations)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("invalid catalogue: {e}")))?;
        Self::from_declarations(file.operations)
    }

    /// Load a catalogue file; `.json` files are read as JSON, anything else as YAML
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            message: format!("failed to read catalogue {}", path.display()),
            source: Box::new(e),
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn from_declarations(
        declarations: impl IntoIterator<Item = OperationDeclaration>,
    ) -> Result<Self> {
        let mut catalog = Self::new();
        for declaration in declarations {
            catalog.insert(declaration.build()?)?;
        }
        Ok(catalog)
    }

    /// Add a descriptor; names must be unique
    pub fn insert(&mut self, descriptor: OperationDescriptor) -> Result<Arc<OperationDescriptor>> {
        let name = descriptor.name().to_string();
        if self.operations.contains_key(&name) {
            return Err(BuildError::DuplicateOperation(name).into());
        }
        let descriptor = Arc::new(descriptor);
        self.operations.insert(name, descriptor.clone());
        Ok(descriptor)
    }

    pub fn get(&self, name: &str) -> Option<Arc<OperationDescriptor>> {
        self.operations.get(name).cloned()
    }

    /// Look up an operation, failing with a build error when it is unknown
    pub fn require(&self, name: &str) -> Result<Arc<OperationDescriptor>> {
        self.get(name)
            .ok_or_else(|| BuildError::UnknownOperation(name.to_string()).into())
    }

    pub fn names(&self) -> Vec<&str> {
        self.operations.keys().map(|s| s.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<OperationDescriptor>> {
        self.operations.values()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::descriptor::{NextLink, ReturnShape};
    use reqwest::Method;

    #[test]
    fn test_builtin_catalog_loads_successfully() {
        let catalog = Catalog::builtin();
        assert!(!catalog.is_empty(), "Catalogue should have operations");
        assert!(catalog.names().contains(&"listRepositories"));
    }

    #[test]
    fn test_builtin_operations_have_expected_shapes() {
        let catalog = Catalog::builtin();

        let check = catalog.get("checkDockerV2Support").unwrap();
        assert_eq!(check.verb(), &Method::HEAD);
        assert_eq!(check.returns(), &ReturnShape::Exists);

        let tags = catalog.get("listTags").unwrap();
        match tags.returns() {
            ReturnShape::Paged(shape) => {
                assert_eq!(shape.items, "tags");
                assert_eq!(shape.next_link, NextLink::LinkHeader);
            }
            other => panic!("unexpected shape {other:?}"),
        }
        assert_eq!(tags.error_type_for(404), "not_found");
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let yaml = r#"
operations:
  - { name: ping, verb: GET, path: /ping }
  - { name: ping, verb: HEAD, path: /ping }
"#;
        let err = Catalog::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::Build(BuildError::DuplicateOperation(_))));
    }

    #[test]
    fn test_invalid_declaration_fails_on_load() {
        let yaml = r#"
operations:
  - { name: broken, verb: GET, path: "/v2/{name}" }
"#;
        let err = Catalog::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::Build(BuildError::UnboundPlaceholder { .. })));
    }

    #[test]
    fn test_every_builtin_error_tag_is_registered() {
        let types = registry_error_types();
        for op in Catalog::builtin().iter() {
            for status in [400, 401, 404, 409, 500] {
                let tag = op.error_type_for(status);
                assert!(types.contains(tag), "{} uses unregistered tag {}", op.name(), tag);
            }
        }
    }

    #[test]
    fn test_json_catalog() {
        let json = r#"{"operations": [{"name": "ping", "verb": "GET", "path": "/ping"}]}"#;
        let catalog = Catalog::from_json_str(json).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(matches!(
            catalog.require("pong"),
            Err(Error::Build(BuildError::UnknownOperation(_)))
        ));
    }
}
