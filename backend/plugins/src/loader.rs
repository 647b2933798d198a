//! Plugin loader: evaluates stored plugin source into descriptors.
//!
//! Nothing is cached here. Every call re-evaluates the source, so an edited
//! plugin takes effect on the next pipeline run.

use std::sync::Arc;

use parley_config::SandboxConfig;
use parley_core::{ConfigValue, LoadError, PluginRecord};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::descriptor::PluginDescriptor;
use crate::evaluator::Evaluator;
use crate::rhai_runtime::RhaiEvaluator;

#[derive(Clone)]
pub struct PluginLoader {
    evaluator: Arc<dyn Evaluator>,
}

impl PluginLoader {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Loader backed by the sandboxed Rhai evaluator.
    pub fn rhai(sandbox: &SandboxConfig) -> Self {
        Self::new(Arc::new(RhaiEvaluator::new(sandbox)))
    }

    pub fn load(&self, id: &str, source: &str) -> Result<PluginDescriptor, LoadError> {
        let module = self.evaluator.load(source)?;
        debug!(plugin = %id, name = %module.name, "Loaded plugin");
        Ok(PluginDescriptor::new(id, source, module))
    }

    /// Load a stored record. The source is authoritative; a stale hash is
    /// logged but does not block loading.
    pub fn load_record(&self, record: &PluginRecord) -> Result<PluginDescriptor, LoadError> {
        if !check_content(&record.source, Some(&record.content_hash)) {
            warn!(plugin = %record.id, "Stored content hash does not match plugin source");
        }
        self.load(&record.id, &record.source)
    }

    /// Build a new record from source, filling the cached descriptive
    /// fields from one evaluation.
    pub fn record_from_source(
        &self,
        id: impl Into<String>,
        source: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<PluginRecord, LoadError> {
        let id = id.into();
        let source = source.into();
        let descriptor = self.load(&id, &source)?;
        Ok(PluginRecord {
            content_hash: content_hash(&source),
            id,
            name: descriptor.name,
            description: descriptor.description,
            tags,
            source,
            config_schema: descriptor.config_schema,
            global_config: ConfigValue::new(),
        })
    }

    /// Replace a record's source, refreshing its hash and cached fields.
    /// The record is untouched if the new source fails to load.
    pub fn update_source(&self, record: &mut PluginRecord, source: impl Into<String>) -> Result<(), LoadError> {
        let source = source.into();
        let descriptor = self.load(&record.id, &source)?;
        record.content_hash = content_hash(&source);
        record.name = descriptor.name;
        record.description = descriptor.description;
        record.config_schema = descriptor.config_schema;
        record.source = source;
        Ok(())
    }
}

/// Hex SHA-256 of plugin source.
pub fn content_hash(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Whether `source` matches `expected`. A missing hash never matches.
pub fn check_content(source: &str, expected: Option<&str>) -> bool {
    expected.is_some_and(|hash| hash.eq_ignore_ascii_case(&content_hash(source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        fn tag(chat, config, caps) { chat.metadata.tagged = true; chat }
        #{
            name: "Tagger",
            description: "Marks conversations",
            configSchema: #{ label: #{ "type": "string", "default": "x" } },
            outboundHooks: [ #{ order: 1, handler: Fn("tag") } ],
        }
    "#;

    #[test]
    fn hash_is_hex_sha256() {
        let hash = content_hash("abc");
        assert_eq!(hash, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert!(check_content("abc", Some(&hash)));
        assert!(check_content("abc", Some(&hash.to_uppercase())));
        assert!(!check_content("abd", Some(&hash)));
        assert!(!check_content("abc", None));
    }

    #[test]
    fn record_from_source_caches_descriptor_fields() {
        let loader = PluginLoader::rhai(&SandboxConfig::default());
        let record = loader.record_from_source("p1", SOURCE, vec!["util".into()]).unwrap();
        assert_eq!(record.name, "Tagger");
        assert_eq!(record.description, "Marks conversations");
        assert!(record.config_schema.contains_key("label"));
        assert_eq!(record.content_hash, content_hash(SOURCE));
        assert!(record.global_config.is_empty());

        let descriptor = loader.load_record(&record).unwrap();
        assert_eq!(descriptor.id, "p1");
        assert_eq!(descriptor.hooks.outbound.len(), 1);
    }

    #[test]
    fn failed_update_leaves_record_intact() {
        let loader = PluginLoader::rhai(&SandboxConfig::default());
        let mut record = loader.record_from_source("p1", SOURCE, Vec::new()).unwrap();
        let before = record.clone();

        assert!(loader.update_source(&mut record, "#{ name: 1 }").is_err());
        assert_eq!(record, before);

        let renamed = SOURCE.replace("Tagger", "Marker");
        loader.update_source(&mut record, renamed.clone()).unwrap();
        assert_eq!(record.name, "Marker");
        assert_eq!(record.content_hash, content_hash(&renamed));
    }
}
