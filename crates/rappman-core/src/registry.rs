//! [`RappRegistry`] – ordered, immutable catalog of installed rapps.
//!
//! Catalogs are TOML files containing `[[rapp]]` tables.  A registry is
//! built from a semicolon-separated list of catalog paths; entries are
//! merged in configured order with first-wins semantics (a later duplicate
//! is logged as a conflict and skipped, it never overrides).
//!
//! The load is fail-fast: any unreadable source or schema violation aborts
//! the whole load, since an incomplete catalog could silently block
//! legitimate app starts.  Once loaded the registry never changes; reload
//! means building a new registry and restarting.
//!
//! A descriptor whose `required_capabilities` are not all present in the
//! platform's available-capability set is *installed* but not *runnable*;
//! starting it fails before any process is spawned.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rappman_types::{RappDescriptor, RegistryError};
use serde::Deserialize;
use tracing::{info, warn};

/// On-disk shape of a single catalog file.
#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    rapp: Vec<RappDescriptor>,
}

/// Ordered mapping from rapp identifier to descriptor.
pub struct RappRegistry {
    /// Descriptors in catalog order (first-wins merge order preserved).
    rapps: Vec<RappDescriptor>,
    /// id → index into `rapps`.
    index: HashMap<String, usize>,
    /// Ids whose required capabilities are all available on this platform.
    runnable: HashSet<String>,
}

impl RappRegistry {
    /// Load and merge every catalog named in `sources` (semicolon-separated
    /// paths, blank segments ignored).
    ///
    /// # Errors
    ///
    /// - [`RegistryError::SourceUnreadable`] when any source cannot be read.
    /// - [`RegistryError::MalformedEntry`] on TOML schema violations or
    ///   entries with an empty `id` / `entry_point`.
    pub fn load(sources: &str, available_capabilities: &[String]) -> Result<Self, RegistryError> {
        let mut registry = Self {
            rapps: Vec::new(),
            index: HashMap::new(),
            runnable: HashSet::new(),
        };

        for source in sources.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            registry.merge_source(Path::new(source))?;
        }
        registry.compute_runnable(available_capabilities);

        info!(
            installed = registry.rapps.len(),
            runnable = registry.runnable.len(),
            "rapp registry loaded"
        );
        Ok(registry)
    }

    /// Build a registry directly from descriptors, bypassing catalog files.
    /// Merge semantics match [`RappRegistry::load`]: first-wins on duplicate
    /// identifiers.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = RappDescriptor>,
        available_capabilities: &[String],
    ) -> Self {
        let mut registry = Self {
            rapps: Vec::new(),
            index: HashMap::new(),
            runnable: HashSet::new(),
        };
        for rapp in descriptors {
            if registry.index.contains_key(&rapp.id) {
                warn!(rapp = %rapp.id, "duplicate descriptor, keeping the earlier one");
                continue;
            }
            registry.index.insert(rapp.id.clone(), registry.rapps.len());
            registry.rapps.push(rapp);
        }
        registry.compute_runnable(available_capabilities);
        registry
    }

    fn compute_runnable(&mut self, available_capabilities: &[String]) {
        let caps: HashSet<&str> = available_capabilities.iter().map(String::as_str).collect();
        for rapp in &self.rapps {
            let missing: Vec<&str> = rapp
                .required_capabilities
                .iter()
                .map(String::as_str)
                .filter(|c| !caps.contains(c))
                .collect();
            if missing.is_empty() {
                self.runnable.insert(rapp.id.clone());
            } else {
                warn!(
                    rapp = %rapp.id,
                    missing = ?missing,
                    "rapp installed but not runnable, required capabilities unavailable"
                );
            }
        }
    }

    fn merge_source(&mut self, source: &Path) -> Result<(), RegistryError> {
        let raw = std::fs::read_to_string(source).map_err(|e| RegistryError::SourceUnreadable {
            path: source.display().to_string(),
            detail: e.to_string(),
        })?;
        let catalog: CatalogFile =
            toml::from_str(&raw).map_err(|e| RegistryError::MalformedEntry {
                path: source.display().to_string(),
                detail: e.to_string(),
            })?;

        for rapp in catalog.rapp {
            if rapp.id.is_empty() || rapp.entry_point.is_empty() {
                return Err(RegistryError::MalformedEntry {
                    path: source.display().to_string(),
                    detail: "rapp entries need a non-empty 'id' and 'entry_point'".to_string(),
                });
            }
            if self.index.contains_key(&rapp.id) {
                warn!(
                    rapp = %rapp.id,
                    source = %source.display(),
                    "duplicate catalog entry, keeping the earlier one"
                );
                continue;
            }
            self.index.insert(rapp.id.clone(), self.rapps.len());
            self.rapps.push(rapp);
        }
        Ok(())
    }

    /// Look up a descriptor by identifier.
    pub fn lookup(&self, id: &str) -> Result<&RappDescriptor, RegistryError> {
        self.index
            .get(id)
            .map(|&i| &self.rapps[i])
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Whether every required capability of `id` is available.  Unknown ids
    /// are not runnable.
    pub fn is_runnable(&self, id: &str) -> bool {
        self.runnable.contains(id)
    }

    /// All installed descriptors in catalog order.
    pub fn installed_rapps(&self) -> &[RappDescriptor] {
        &self.rapps
    }

    /// Installed descriptors whose capability requirements are satisfied,
    /// in catalog order.
    pub fn runnable_rapps(&self) -> Vec<&RappDescriptor> {
        self.rapps
            .iter()
            .filter(|r| self.runnable.contains(&r.id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rapps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rapps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_catalog(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).expect("create catalog");
        f.write_all(body.as_bytes()).expect("write catalog");
        path.display().to_string()
    }

    const TALKER_CHIRP: &str = r#"
        [[rapp]]
        id = "demo/talker"
        display_name = "Talker"
        entry_point = "/opt/rapps/talker"

        [[rapp]]
        id = "demo/chirp"
        entry_point = "/opt/rapps/chirp"
        required_capabilities = ["audio"]
    "#;

    #[test]
    fn loads_single_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(&dir, "demo.toml", TALKER_CHIRP);

        let registry = RappRegistry::load(&path, &[]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("demo/talker").unwrap().display_name, "Talker");
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(&dir, "demo.toml", TALKER_CHIRP);

        let registry = RappRegistry::load(&path, &[]).unwrap();
        assert!(matches!(
            registry.lookup("demo/ghost"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn merge_is_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_catalog(
            &dir,
            "first.toml",
            r#"
            [[rapp]]
            id = "demo/talker"
            display_name = "Original"
            entry_point = "/opt/rapps/talker"
            "#,
        );
        let second = write_catalog(
            &dir,
            "second.toml",
            r#"
            [[rapp]]
            id = "demo/talker"
            display_name = "Override Attempt"
            entry_point = "/evil/talker"
            "#,
        );

        let sources = format!("{first};{second}");
        let registry = RappRegistry::load(&sources, &[]).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("demo/talker").unwrap().display_name, "Original");
    }

    #[test]
    fn unreadable_source_aborts_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_catalog(&dir, "good.toml", TALKER_CHIRP);
        let sources = format!("{good};{}/missing.toml", dir.path().display());

        let result = RappRegistry::load(&sources, &[]);
        assert!(matches!(
            result,
            Err(RegistryError::SourceUnreadable { .. })
        ));
    }

    #[test]
    fn malformed_toml_aborts_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_catalog(&dir, "bad.toml", "[[rapp]]\nid = 42\n");

        assert!(matches!(
            RappRegistry::load(&bad, &[]),
            Err(RegistryError::MalformedEntry { .. })
        ));
    }

    #[test]
    fn entry_without_entry_point_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_catalog(&dir, "bad.toml", "[[rapp]]\nid = \"demo/x\"\nentry_point = \"\"\n");

        assert!(matches!(
            RappRegistry::load(&bad, &[]),
            Err(RegistryError::MalformedEntry { .. })
        ));
    }

    #[test]
    fn missing_capability_makes_rapp_non_runnable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(&dir, "demo.toml", TALKER_CHIRP);

        let registry = RappRegistry::load(&path, &[]).unwrap();
        assert!(registry.is_runnable("demo/talker"));
        assert!(!registry.is_runnable("demo/chirp"));
        assert_eq!(registry.runnable_rapps().len(), 1);
        assert_eq!(registry.installed_rapps().len(), 2);
    }

    #[test]
    fn available_capability_makes_rapp_runnable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(&dir, "demo.toml", TALKER_CHIRP);

        let registry = RappRegistry::load(&path, &["audio".to_string()]).unwrap();
        assert!(registry.is_runnable("demo/chirp"));
    }

    #[test]
    fn blank_segments_in_source_list_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(&dir, "demo.toml", TALKER_CHIRP);

        let sources = format!(";{path}; ");
        let registry = RappRegistry::load(&sources, &[]).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn empty_source_list_gives_empty_registry() {
        let registry = RappRegistry::load("", &[]).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn from_descriptors_is_first_wins_too() {
        let mk = |name: &str| RappDescriptor {
            id: "demo/talker".to_string(),
            display_name: name.to_string(),
            icon: None,
            entry_point: "/opt/rapps/talker".to_string(),
            args: Vec::new(),
            required_capabilities: Vec::new(),
        };
        let registry = RappRegistry::from_descriptors([mk("first"), mk("second")], &[]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("demo/talker").unwrap().display_name, "first");
        assert!(registry.is_runnable("demo/talker"));
    }
}
