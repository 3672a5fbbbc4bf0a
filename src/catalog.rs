//! Server catalog - the static registry of downstream MCP servers
//!
//! Loaded once at startup from a YAML document with a top-level `servers`
//! mapping:
//!
//! ```yaml
//! servers:
//!   weather:
//!     description: Weather conditions and forecasts
//!     url: http://localhost:8011
//!     audience: mcp-weather
//!     required_role: access:weather
//! ```
//!
//! Entries are immutable for the lifetime of the process and enumerate in
//! document order.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// One downstream MCP server as declared in the catalog
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    /// Unique server name (catalog mapping key)
    pub name: String,
    /// Human-readable description shown in search results
    pub description: String,
    /// Absolute base URL of the downstream server; the gateway speaks MCP
    /// at `{url}/mcp`
    pub url: String,
    /// IdP client id used as the RFC 8693 `audience` for this server
    pub audience: String,
    /// Realm role the subject must hold to activate or use this server
    pub required_role: String,
}

impl ServerDescriptor {
    /// Downstream MCP endpoint for this server
    #[must_use]
    pub fn mcp_endpoint(&self) -> String {
        format!("{}/mcp", self.url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    servers: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    description: String,
    url: String,
    audience: String,
    required_role: String,
}

/// Read-only, ordered collection of [`ServerDescriptor`]s
#[derive(Debug, Default)]
pub struct ServerCatalog {
    servers: Vec<ServerDescriptor>,
    index: HashMap<String, usize>,
}

impl ServerCatalog {
    /// Load and validate the catalog from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read catalog {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate the catalog from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid catalog: {e}")))?;

        let mut servers = Vec::with_capacity(file.servers.len());
        let mut index = HashMap::with_capacity(file.servers.len());

        for (key, value) in file.servers {
            let name = key
                .as_str()
                .ok_or_else(|| Error::Config("Catalog server names must be strings".to_string()))?
                .to_string();
            if name.is_empty() {
                return Err(Error::Config("Catalog server name is empty".to_string()));
            }

            let entry: CatalogEntry = serde_yaml::from_value(value)
                .map_err(|e| Error::Config(format!("Invalid catalog entry '{name}': {e}")))?;

            let url = Url::parse(&entry.url).map_err(|e| {
                Error::Config(format!("Invalid URL for server '{name}': {e}"))
            })?;
            if !url.has_host() {
                return Err(Error::Config(format!(
                    "URL for server '{name}' must be absolute"
                )));
            }
            if entry.audience.is_empty() {
                return Err(Error::Config(format!(
                    "Server '{name}' has an empty audience"
                )));
            }

            if index
                .insert(name.clone(), servers.len())
                .is_some()
            {
                return Err(Error::Config(format!("Duplicate catalog server '{name}'")));
            }
            servers.push(ServerDescriptor {
                name,
                description: entry.description,
                url: entry.url,
                audience: entry.audience,
                required_role: entry.required_role,
            });
        }

        Ok(Self { servers, index })
    }

    /// Look up a server by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServerDescriptor> {
        self.index.get(name).map(|&i| &self.servers[i])
    }

    /// All servers in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.servers.iter()
    }

    /// Number of catalog entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r"
servers:
  weather:
    description: Weather conditions and forecasts
    url: http://localhost:8011
    audience: mcp-weather
    required_role: access:weather
  calculator:
    description: Mathematical calculations
    url: http://localhost:8012/
    audience: mcp-calculator
    required_role: access:calculator
";

    #[test]
    fn parses_catalog_in_document_order() {
        let catalog = ServerCatalog::from_yaml(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        let names: Vec<&str> = catalog.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["weather", "calculator"]);
    }

    #[test]
    fn lookup_by_name() {
        let catalog = ServerCatalog::from_yaml(CATALOG).unwrap();
        let weather = catalog.get("weather").unwrap();
        assert_eq!(weather.audience, "mcp-weather");
        assert_eq!(weather.required_role, "access:weather");
        assert!(catalog.get("nonexistent").is_none());
    }

    #[test]
    fn mcp_endpoint_strips_trailing_slash() {
        let catalog = ServerCatalog::from_yaml(CATALOG).unwrap();
        assert_eq!(
            catalog.get("weather").unwrap().mcp_endpoint(),
            "http://localhost:8011/mcp"
        );
        assert_eq!(
            catalog.get("calculator").unwrap().mcp_endpoint(),
            "http://localhost:8012/mcp"
        );
    }

    #[test]
    fn rejects_relative_url() {
        let yaml = r"
servers:
  bad:
    description: x
    url: not-a-url
    audience: aud
    required_role: role
";
        let err = ServerCatalog::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Invalid URL"));
    }

    #[test]
    fn rejects_empty_audience() {
        let yaml = r#"
servers:
  bad:
    description: x
    url: http://localhost:9000
    audience: ""
    required_role: role
"#;
        let err = ServerCatalog::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("audience"));
    }

    #[test]
    fn rejects_missing_field() {
        let yaml = r"
servers:
  bad:
    description: x
    url: http://localhost:9000
    audience: aud
";
        assert!(ServerCatalog::from_yaml(yaml).is_err());
    }

    #[test]
    fn empty_servers_mapping_is_valid() {
        let catalog = ServerCatalog::from_yaml("servers: {}").unwrap();
        assert!(catalog.is_empty());
    }
}
