//! Mapping definition loading
//!
//! Definitions are loaded from the directories listed in the mappings
//! configuration, in order. Later definitions override earlier ones with the
//! same name.
//!
//! A file holds either a single definition (named by its `mapping-name`, or
//! the file stem when that is absent) or a map of name -> definition.
//!
//! ## Hot-Reload
//!
//! `reload()` re-reads every directory when a tracked file changed or a new
//! YAML file appeared.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use super::DefinitionStore;
use crate::config::MappingsConfig;
use crate::domain::MappingDefinition;
use crate::error::MappingError;

/// Tracked file for hot-reload detection
#[derive(Debug, Clone)]
struct TrackedFile {
    path: PathBuf,
    modified: SystemTime,
}

fn is_yaml(path: &Path) -> bool {
    path.extension().map(|e| e == "yml" || e == "yaml").unwrap_or(false)
}

/// Loader for mapping definitions with hot-reload support
pub struct MappingLoader {
    /// Loaded definitions by name
    definitions: HashMap<String, Arc<MappingDefinition>>,

    /// Tracked files for hot-reload
    tracked_files: Vec<TrackedFile>,

    /// Configuration used for loading
    config: MappingsConfig,
}

impl MappingLoader {
    /// Create a new loader using the given configuration
    pub fn new(config: &MappingsConfig) -> Result<Self> {
        debug!(?config, "MappingLoader::new: called");
        let mut loader = Self {
            definitions: HashMap::new(),
            tracked_files: Vec::new(),
            config: config.clone(),
        };

        loader.load_all()?;
        debug!(count = loader.definitions.len(), "MappingLoader::new: complete");
        Ok(loader)
    }

    /// Load all definitions from configured paths
    fn load_all(&mut self) -> Result<()> {
        debug!("load_all: called");
        self.definitions.clear();
        self.tracked_files.clear();

        for path in self.config.expanded_paths() {
            if path.is_dir() {
                debug!(?path, "load_all: loading from directory");
                self.load_from_directory(&path)?;
            } else {
                debug!(?path, "load_all: directory does not exist, skipping");
            }
        }

        info!(count = self.definitions.len(), "Loaded mapping definitions");
        Ok(())
    }

    /// Check if any tracked files have been modified
    pub fn has_changes(&self) -> bool {
        debug!(tracked_count = self.tracked_files.len(), "has_changes: called");
        for tracked in &self.tracked_files {
            match fs::metadata(&tracked.path).and_then(|m| m.modified()) {
                Ok(modified) if modified > tracked.modified => {
                    debug!(path = ?tracked.path, "has_changes: file modified");
                    return true;
                }
                Err(_) => {
                    debug!(path = ?tracked.path, "has_changes: file removed");
                    return true;
                }
                _ => {}
            }
        }

        // Also check for new files in tracked directories
        for path in self.config.expanded_paths() {
            if let Ok(entries) = fs::read_dir(&path) {
                for entry in entries.filter_map(|e| e.ok()) {
                    let file_path = entry.path();
                    if is_yaml(&file_path) && !self.tracked_files.iter().any(|t| t.path == file_path) {
                        debug!(path = ?file_path, "has_changes: new file detected");
                        return true;
                    }
                }
            }
        }

        debug!("has_changes: no changes detected");
        false
    }

    /// Reload all definitions (hot-reload)
    pub fn reload(&mut self) -> Result<bool> {
        debug!("reload: called");
        if !self.has_changes() {
            debug!("reload: no changes, skipping");
            return Ok(false);
        }

        info!("Hot-reloading mapping definitions");
        self.load_all()?;
        Ok(true)
    }

    /// Load all YAML files from a directory, in file name order
    fn load_from_directory(&mut self, dir: &Path) -> Result<()> {
        debug!(?dir, "load_from_directory: called");

        let entries = fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        paths.sort();

        for path in paths {
            if is_yaml(&path) {
                debug!(?path, "load_from_directory: loading file");
                if let Err(e) = self.load_from_file(&path) {
                    warn!(?path, error = %e, "Failed to load mapping file");
                }
            } else {
                debug!(?path, "load_from_directory: skipping non-yaml file");
            }
        }

        Ok(())
    }

    /// Load mapping definitions from a YAML file
    fn load_from_file(&mut self, path: &Path) -> Result<()> {
        debug!(?path, "load_from_file: called");
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read: {}", path.display()))?;

        // Track file for hot-reload
        if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
            self.tracked_files.push(TrackedFile {
                path: path.to_path_buf(),
                modified,
            });
        }

        // The file can contain a map of name -> definition, or just a definition
        if let Ok(map) = serde_yaml::from_str::<HashMap<String, MappingDefinition>>(&content) {
            debug!(?path, count = map.len(), "load_from_file: parsed as map");
            let mut named: Vec<MappingDefinition> = map
                .into_iter()
                .map(|(name, mut definition)| {
                    if definition.mapping_name.is_empty() {
                        definition.mapping_name = name;
                    }
                    definition
                })
                .collect();
            named.sort_by(|a, b| a.mapping_name.cmp(&b.mapping_name));
            for definition in named {
                self.insert(definition)?;
            }
            return Ok(());
        }

        debug!(?path, "load_from_file: parsing as single definition");
        let mut definition: MappingDefinition =
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse: {}", path.display()))?;

        if definition.mapping_name.is_empty() {
            definition.mapping_name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| eyre::eyre!("Invalid filename: {}", path.display()))?
                .to_string();
        }

        self.insert(definition)
    }

    fn insert(&mut self, definition: MappingDefinition) -> Result<()> {
        definition.validate()?;
        debug!(name = %definition.mapping_name, "insert: storing definition");
        if self.definitions.contains_key(&definition.mapping_name) {
            info!(name = %definition.mapping_name, "Overriding mapping definition");
        }
        self.definitions
            .insert(definition.mapping_name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Get a definition by name
    pub fn get(&self, name: &str) -> Option<&MappingDefinition> {
        self.definitions.get(name).map(|d| d.as_ref())
    }

    /// Get all loaded definition names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Get the number of loaded definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Check if no definitions are loaded
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Report child-table references that don't resolve, and reference cycles
    pub fn check_references(&self) -> Vec<String> {
        debug!(count = self.definitions.len(), "check_references: called");
        let mut problems = Vec::new();

        for name in self.names() {
            let definition = &self.definitions[name];
            for child in definition.child_mappings() {
                if !self.definitions.contains_key(child) {
                    problems.push(format!("{name}: child table mapping '{child}' not found"));
                }
            }
            if let Some(cycle) = self.find_cycle(name, &mut Vec::new()) {
                problems.push(format!("{name}: child table mappings form a cycle: {}", cycle.join(" -> ")));
            }
        }

        debug!(problem_count = problems.len(), "check_references: complete");
        problems
    }

    fn find_cycle(&self, name: &str, path: &mut Vec<String>) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|p| p == name) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(name.to_string());
            return (pos == 0).then_some(cycle);
        }
        let definition = self.definitions.get(name)?;
        path.push(name.to_string());
        for child in definition.child_mappings() {
            if let Some(cycle) = self.find_cycle(child, path) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }
}

impl DefinitionStore for MappingLoader {
    fn load_mapping_by_name(&self, name: &str) -> Result<Arc<MappingDefinition>, MappingError> {
        debug!(%name, "MappingLoader::load_mapping_by_name: called");
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| MappingError::DefinitionNotFound { name: name.to_string() })
    }
}
