//! Layered mock data resolution.
//!
//! A logical key `{system}/{module}/{entityKey}` maps to one JSON file per
//! layer. Layers are consulted in order (extensions, profile, common) and the
//! first file that exists and parses wins. Resolved values are cached per
//! `(type, logical key)` for the lifetime of the process.

use crate::error::{MockError, Result};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Entity key under which a module's collection is stored.
pub const COLLECTION_KEY: &str = "list";

/// One tier of the data fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Extensions,
    Profile,
    Common,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::Extensions => "extensions",
            Layer::Profile => "profile",
            Layer::Common => "common",
        })
    }
}

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub data_root: PathBuf,
    pub extensions_enabled: bool,
    /// Name of the profile layer; `None` disables it
    pub profile: Option<String>,
}

impl ResolverConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            extensions_enabled: true,
            profile: None,
        }
    }
}

/// A validated `{system}/{module}/{entityKey}` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalKey {
    pub system: String,
    pub module: String,
    pub entity: String,
}

impl LogicalKey {
    pub fn parse(key: &str) -> Result<Self> {
        let invalid = |reason: &str| MockError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = key.splitn(3, '/');
        let (system, module, entity) = match (parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(m), Some(e)) => (s, m, e),
            _ => return Err(invalid("expected {system}/{module}/{entityKey}")),
        };

        if key.contains('\\') {
            return Err(invalid("backslashes are not allowed"));
        }
        for segment in [system, module].into_iter().chain(entity.split('/')) {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if segment == "." || segment == ".." {
                return Err(invalid("relative segments are not allowed"));
            }
        }

        Ok(Self {
            system: system.to_string(),
            module: module.to_string(),
            entity: entity.to_string(),
        })
    }

    pub fn from_parts(system: &str, module: &str, entity: &str) -> Result<Self> {
        Self::parse(&format!("{}/{}/{}", system, module, entity))
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.system, self.module, self.entity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    type_id: TypeId,
    key: String,
}

impl CacheKey {
    fn of<T: 'static>(key: &str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            key: key.to_string(),
        }
    }
}

/// A cached resolution result.
#[derive(Clone)]
pub struct CachedEntry {
    value: Arc<dyn Any + Send + Sync>,
    pub layer: Layer,
    pub key: String,
}

/// Resolves logical keys against the layered data directory.
pub struct DataResolver {
    config: ResolverConfig,
    cache: DashMap<CacheKey, CachedEntry>,
}

impl DataResolver {
    pub fn new(config: ResolverConfig) -> Self {
        debug!(
            data_root = %config.data_root.display(),
            extensions = config.extensions_enabled,
            profile = ?config.profile,
            "Data resolver initialized"
        );
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Active layers, in resolution order.
    pub fn layers(&self) -> Vec<Layer> {
        let mut layers = Vec::with_capacity(3);
        if self.config.extensions_enabled {
            layers.push(Layer::Extensions);
        }
        if self.config.profile.is_some() {
            layers.push(Layer::Profile);
        }
        layers.push(Layer::Common);
        layers
    }

    /// Layer `save` writes to; nothing active shadows it.
    pub fn write_layer(&self) -> Layer {
        self.layers().first().copied().unwrap_or(Layer::Common)
    }

    /// Directory holding a layer's data.
    pub fn layer_dir(&self, layer: Layer) -> PathBuf {
        let root = &self.config.data_root;
        match (layer, &self.config.profile) {
            (Layer::Extensions, _) => root.join("extensions"),
            (Layer::Profile, Some(profile)) => root.join("profiles").join(profile),
            (Layer::Profile, None) => root.join("profiles"),
            (Layer::Common, _) => root.join("common"),
        }
    }

    /// File backing `key` within `layer`.
    pub fn file_path(&self, layer: Layer, key: &LogicalKey) -> PathBuf {
        let mut path = self.layer_dir(layer).join(&key.system).join(&key.module);
        let (dirs, file) = match key.entity.rsplit_once('/') {
            Some((dirs, file)) => (Some(dirs), file),
            None => (None, key.entity.as_str()),
        };
        for segment in dirs.into_iter().flat_map(|d| d.split('/')) {
            path.push(segment);
        }
        path.push(format!("{}.json", file));
        path
    }

    /// Resolve a logical key to a typed value.
    pub fn resolve<T>(&self, logical_key: &str) -> Result<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let key = LogicalKey::parse(logical_key)?;
        let canonical = key.to_string();

        if let Some(entry) = self.cache.get(&CacheKey::of::<T>(&canonical)) {
            if let Some(value) = entry.value.downcast_ref::<T>() {
                return Ok(value.clone());
            }
        }

        for layer in self.layers() {
            let path = self.file_path(layer, &key);
            if !path.is_file() {
                continue;
            }
            match read_json::<T>(&path) {
                Ok(value) => {
                    debug!(key = %canonical, layer = %layer, "Resolved mock data");
                    self.cache.insert(
                        CacheKey::of::<T>(&canonical),
                        CachedEntry {
                            value: Arc::new(value.clone()),
                            layer,
                            key: canonical,
                        },
                    );
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        key = %canonical,
                        layer = %layer,
                        path = %path.display(),
                        error = %e,
                        "Failed to parse mock data, falling through to next layer"
                    );
                }
            }
        }

        Err(MockError::DataNotFound { key: canonical })
    }

    pub fn resolve_in<T>(&self, system: &str, module: &str, entity: &str) -> Result<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.resolve(&format!("{}/{}/{}", system, module, entity))
    }

    /// Resolve a module's collection. Missing data yields an empty Vec.
    pub fn resolve_collection<T>(&self, system: &str, module: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        match self.resolve_in::<Vec<T>>(system, module, COLLECTION_KEY) {
            Ok(items) => Ok(items),
            Err(MockError::DataNotFound { key }) => {
                debug!(key = %key, "No collection data, returning empty list");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Persist a value and make it immediately visible to `resolve`.
    ///
    /// Writes to the highest active layer: extensions when enabled, then
    /// the profile when set, otherwise common.
    pub fn save<T>(&self, value: &T, system: &str, module: &str, entity: &str) -> Result<PathBuf>
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        let key = LogicalKey::from_parts(system, module, entity)?;
        let layer = self.write_layer();
        let path = self.file_path(layer, &key);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(value)?)?;

        let canonical = key.to_string();
        self.invalidate(&canonical);
        self.cache.insert(
            CacheKey::of::<T>(&canonical),
            CachedEntry {
                value: Arc::new(value.clone()),
                layer,
                key: canonical.clone(),
            },
        );

        debug!(key = %canonical, layer = %layer, path = %path.display(), "Saved mock data");
        Ok(path)
    }

    /// Layer a cached value of type `T` was resolved from, if cached.
    pub fn cached_layer<T: 'static>(&self, logical_key: &str) -> Option<Layer> {
        self.cache
            .get(&CacheKey::of::<T>(logical_key))
            .map(|entry| entry.layer)
    }

    /// Drop every cached entry for a logical key, whatever its type.
    pub fn invalidate(&self, logical_key: &str) {
        self.cache.retain(|k, _| k.key != logical_key);
    }

    pub fn clear_cache(&self) {
        let cleared = self.cache.len();
        self.cache.clear();
        debug!(cleared, "Resolver cache cleared");
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn resolver(root: &TempDir, extensions: bool) -> DataResolver {
        DataResolver::new(ResolverConfig {
            data_root: root.path().to_path_buf(),
            extensions_enabled: extensions,
            profile: None,
        })
    }

    #[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
    struct Material {
        id: String,
        description: String,
    }

    #[test]
    fn test_logical_key_parsing() {
        let key = LogicalKey::parse("ERP01/MM/MAT001").unwrap();
        assert_eq!(key.system, "ERP01");
        assert_eq!(key.module, "MM");
        assert_eq!(key.entity, "MAT001");

        let nested = LogicalKey::parse("ERP01/MM/plants/P100").unwrap();
        assert_eq!(nested.entity, "plants/P100");

        assert!(LogicalKey::parse("ERP01/MM").is_err());
        assert!(LogicalKey::parse("ERP01//MAT001").is_err());
        assert!(LogicalKey::parse("ERP01/MM/../secrets").is_err());
        assert!(LogicalKey::parse("ERP01/MM/a\\b").is_err());
    }

    #[test]
    fn test_resolve_from_common() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "common/ERP01/MM/MAT001.json", r#"{"id":"MAT001","description":"Steel"}"#);

        let resolver = resolver(&dir, true);
        let material: Material = resolver.resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(material.description, "Steel");
        assert_eq!(resolver.cached_layer::<Material>("ERP01/MM/MAT001"), Some(Layer::Common));
    }

    #[test]
    fn test_extensions_layer_wins_when_enabled() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "common/ERP01/MM/MAT001.json", r#"{"source":"common"}"#);
        write(dir.path(), "extensions/ERP01/MM/MAT001.json", r#"{"source":"extensions"}"#);

        let value: Value = resolver(&dir, true).resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(value["source"], "extensions");

        let value: Value = resolver(&dir, false).resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(value["source"], "common");
    }

    #[test]
    fn test_extensions_only_value_is_resolved() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "extensions/ERP01/SD/ORD1.json", r#"{"order":"ORD1"}"#);

        let value: Value = resolver(&dir, true).resolve("ERP01/SD/ORD1").unwrap();
        assert_eq!(value["order"], "ORD1");
    }

    #[test]
    fn test_profile_layer_sits_between_extensions_and_common() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "common/ERP01/MM/MAT001.json", r#"{"source":"common"}"#);
        write(dir.path(), "profiles/uat/ERP01/MM/MAT001.json", r#"{"source":"profile"}"#);

        let resolver = DataResolver::new(ResolverConfig {
            data_root: dir.path().to_path_buf(),
            extensions_enabled: true,
            profile: Some("uat".to_string()),
        });
        assert_eq!(
            resolver.layers(),
            vec![Layer::Extensions, Layer::Profile, Layer::Common]
        );
        let value: Value = resolver.resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(value["source"], "profile");
    }

    #[test]
    fn test_unparseable_layer_falls_through() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "extensions/ERP01/MM/MAT001.json", "{ not json");
        write(dir.path(), "common/ERP01/MM/MAT001.json", r#"{"id":"MAT001","description":"Steel"}"#);

        let material: Material = resolver(&dir, true).resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(material.id, "MAT001");
    }

    #[test]
    fn test_missing_key_is_data_not_found() {
        let dir = TempDir::new().unwrap();
        let err = resolver(&dir, true)
            .resolve::<Value>("ERP01/MM/MISSING")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_missing_collection_is_empty() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir, true);

        assert!(resolver.resolve::<Vec<Value>>("ERP01/MM/list").is_err());
        let items: Vec<Value> = resolver.resolve_collection("ERP01", "MM").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_collection_is_resolved() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "common/ERP01/MM/list.json", r#"[{"id":"A"},{"id":"B"}]"#);

        let items: Vec<Value> = resolver(&dir, true).resolve_collection("ERP01", "MM").unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_save_then_resolve_returns_saved_value() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "common/ERP01/MM/MAT001.json", r#"{"id":"MAT001","description":"Steel"}"#);
        let resolver = resolver(&dir, true);

        let before: Material = resolver.resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(before.description, "Steel");

        let updated = Material {
            id: "MAT001".to_string(),
            description: "Stainless steel".to_string(),
        };
        let path = resolver.save(&updated, "ERP01", "MM", "MAT001").unwrap();
        assert!(path.starts_with(dir.path().join("extensions")));

        let after: Material = resolver.resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(after, updated);

        // Other typed views of the same key are re-read, not stale
        let raw: Value = resolver.resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(raw, json!({"id": "MAT001", "description": "Stainless steel"}));
    }

    #[test]
    fn test_save_without_extensions_writes_common() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir, false);

        let path = resolver
            .save(&json!({"id": "V1"}), "ERP01", "FI", "vendors/V1")
            .unwrap();
        assert_eq!(path, dir.path().join("common/ERP01/FI/vendors/V1.json"));
        assert!(path.is_file());
    }

    #[test]
    fn test_save_with_profile_and_no_extensions_is_not_shadowed() {
        #[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
        struct Tagged {
            source: String,
        }

        let dir = TempDir::new().unwrap();
        write(dir.path(), "profiles/uat/ERP01/MM/MAT001.json", r#"{"source":"profile"}"#);
        let resolver = DataResolver::new(ResolverConfig {
            data_root: dir.path().to_path_buf(),
            extensions_enabled: false,
            profile: Some("uat".to_string()),
        });
        assert_eq!(resolver.write_layer(), Layer::Profile);

        let path = resolver
            .save(&json!({"source": "saved"}), "ERP01", "MM", "MAT001")
            .unwrap();
        assert_eq!(path, dir.path().join("profiles/uat/ERP01/MM/MAT001.json"));

        let other_view: Tagged = resolver.resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(other_view.source, "saved");

        resolver.clear_cache();
        let reread: Value = resolver.resolve("ERP01/MM/MAT001").unwrap();
        assert_eq!(reread["source"], "saved");
    }

    #[test]
    fn test_cache_survives_file_removal_until_cleared() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "common/ERP01/MM/MAT001.json", r#"{"id":"MAT001"}"#);
        let resolver = resolver(&dir, true);

        let _: Value = resolver.resolve("ERP01/MM/MAT001").unwrap();
        std::fs::remove_file(dir.path().join("common/ERP01/MM/MAT001.json")).unwrap();

        assert!(resolver.resolve::<Value>("ERP01/MM/MAT001").is_ok());
        assert_eq!(resolver.cache_len(), 1);

        resolver.clear_cache();
        assert_eq!(resolver.cache_len(), 0);
        assert!(resolver.resolve::<Value>("ERP01/MM/MAT001").is_err());
    }
}
