//! # Service Catalog
//!
//! Which logical services need which kind of credential.

/// Service names per credential kind. The empty name is the root database role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCatalog {
    pub database: Vec<String>,
    pub messaging: Vec<String>,
    pub encryption: Vec<String>,
    pub access_token: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

impl ServiceCatalog {
    /// The services of a Taskcluster deployment.
    #[must_use]
    pub fn taskcluster() -> Self {
        Self {
            database: names(&[
                "",
                "github",
                "auth",
                "hooks",
                "index",
                "notify",
                "object",
                "purge_cache",
                "queue",
                "secrets",
                "web_server",
                "worker_manager",
            ]),
            messaging: names(&[
                "auth",
                "github",
                "hooks",
                "index",
                "notify",
                "queue",
                "web_server",
                "worker_manager",
            ]),
            encryption: names(&[
                "auth",
                "hooks",
                "object",
                "secrets",
                "web_server",
                "worker_manager",
            ]),
            access_token: names(&[
                "built_in_workers",
                "github",
                "hooks",
                "index",
                "notify",
                "object",
                "purge_cache",
                "queue",
                "root",
                "secrets",
                "web_server",
                "worker_manager",
            ]),
        }
    }

    /// Every service name mentioned anywhere in the catalog, without duplicates.
    #[cfg(test)]
    pub(crate) fn all_services(&self) -> Vec<&str> {
        let mut all: Vec<&str> = Vec::new();
        for name in self
            .database
            .iter()
            .chain(&self.messaging)
            .chain(&self.encryption)
            .chain(&self.access_token)
        {
            if !all.contains(&name.as_str()) {
                all.push(name);
            }
        }
        all
    }
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::taskcluster()
    }
}

/// `purge_cache` becomes `purge-cache`.
#[must_use]
pub fn dash_name(service: &str) -> String {
    service.replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taskcluster_catalog_sizes() {
        let catalog = ServiceCatalog::taskcluster();
        assert_eq!(catalog.database.len(), 12);
        assert_eq!(catalog.messaging.len(), 8);
        assert_eq!(catalog.encryption.len(), 6);
        assert_eq!(catalog.access_token.len(), 12);
        assert_eq!(catalog.database[0], "");
    }

    #[test]
    fn test_all_services_deduplicates() {
        let catalog = ServiceCatalog::taskcluster();
        let all = catalog.all_services();
        assert!(all.contains(&""));
        assert!(all.contains(&"root"));
        assert!(all.contains(&"built_in_workers"));
        assert_eq!(all.iter().filter(|s| **s == "auth").count(), 1);
    }

    #[test]
    fn test_dash_name() {
        assert_eq!(dash_name("worker_manager"), "worker-manager");
        assert_eq!(dash_name("queue"), "queue");
    }
}
