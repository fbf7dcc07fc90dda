//! Control-plane view of resident processors
//!
//! The registry is the non-RT mirror of what lives in the graph: names,
//! ids, parameter descriptors and the shared value stores. The control
//! surface, MIDI dispatcher and configurator resolve against it without
//! ever touching the RT thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use reef_core::{EngineError, EngineResult, ObjectId, ParameterDescriptor, ParameterStore};

/// Published facts about one resident processor
#[derive(Clone)]
pub struct RegistryEntry {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub is_track: bool,
    /// Owning track for plugins; `None` for tracks themselves
    pub track: Option<ObjectId>,
    /// Bus width for tracks, current channel count for plugins
    pub channels: usize,
    /// Loader uid for plugins (catalog key, binary path or uri)
    pub uid: String,
    pub plugin_type: Option<crate::plugins::PluginType>,
    pub descriptors: Arc<Vec<ParameterDescriptor>>,
    pub parameters: Arc<ParameterStore>,
}

#[derive(Default)]
struct RegistryInner {
    by_name: HashMap<String, Arc<RegistryEntry>>,
    by_id: HashMap<u64, Arc<RegistryEntry>>,
    track_order: Vec<ObjectId>,
    track_plugins: HashMap<u64, Vec<ObjectId>>,
}

#[derive(Default)]
pub struct ProcessorRegistry {
    inner: RwLock<RegistryInner>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    pub fn insert(&self, entry: RegistryEntry) {
        let mut inner = self.inner.write();
        let entry = Arc::new(entry);
        if entry.is_track {
            inner.track_order.push(entry.id);
            inner.track_plugins.insert(entry.id.raw(), Vec::new());
        } else if let Some(track) = entry.track {
            inner
                .track_plugins
                .entry(track.raw())
                .or_default()
                .push(entry.id);
        }
        inner.by_id.insert(entry.id.raw(), entry.clone());
        inner.by_name.insert(entry.name.clone(), entry);
    }

    /// Remove one processor; removing a track also forgets its plugins
    pub fn remove(&self, id: ObjectId) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.by_id.remove(&id.raw()) else {
            return;
        };
        inner.by_name.remove(&entry.name);
        if entry.is_track {
            inner.track_order.retain(|t| *t != id);
            if let Some(plugins) = inner.track_plugins.remove(&id.raw()) {
                for plugin in plugins {
                    if let Some(plugin_entry) = inner.by_id.remove(&plugin.raw()) {
                        inner.by_name.remove(&plugin_entry.name);
                    }
                }
            }
        } else if let Some(track) = entry.track {
            if let Some(plugins) = inner.track_plugins.get_mut(&track.raw()) {
                plugins.retain(|p| *p != id);
            }
        }
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        self.inner.read().by_name.get(name).cloned()
    }

    pub fn by_id(&self, id: ObjectId) -> Option<Arc<RegistryEntry>> {
        self.inner.read().by_id.get(&id.raw()).cloned()
    }

    /// Resolve a name or fail with the status the control API reports
    pub fn resolve(&self, name: &str) -> EngineResult<Arc<RegistryEntry>> {
        self.by_name(name)
            .ok_or_else(|| EngineError::InvalidProcessor(name.to_string()))
    }

    pub fn resolve_track(&self, name: &str) -> EngineResult<Arc<RegistryEntry>> {
        match self.by_name(name) {
            Some(entry) if entry.is_track => Ok(entry),
            _ => Err(EngineError::InvalidTrackName(name.to_string())),
        }
    }

    /// Dense parameter index for a named parameter of a named processor
    pub fn parameter_index(&self, processor: &str, parameter: &str) -> EngineResult<u32> {
        let entry = self.resolve(processor)?;
        entry
            .descriptors
            .iter()
            .find(|d| d.name == parameter)
            .map(|d| d.index)
            .ok_or_else(|| EngineError::InvalidParameter(parameter.to_string()))
    }

    /// Track ids in declaration order
    pub fn tracks(&self) -> Vec<Arc<RegistryEntry>> {
        let inner = self.inner.read();
        inner
            .track_order
            .iter()
            .filter_map(|id| inner.by_id.get(&id.raw()).cloned())
            .collect()
    }

    /// Plugin entries of a track, in chain order
    pub fn plugins_of(&self, track: ObjectId) -> Vec<Arc<RegistryEntry>> {
        let inner = self.inner.read();
        inner
            .track_plugins
            .get(&track.raw())
            .map(|plugins| {
                plugins
                    .iter()
                    .filter_map(|id| inner.by_id.get(&id.raw()).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every resident entry, tracks first in order, then their plugins
    pub fn all_in_order(&self) -> Vec<Arc<RegistryEntry>> {
        let mut out = Vec::new();
        for track in self.tracks() {
            out.push(track.clone());
            out.extend(self.plugins_of(track.id));
        }
        out
    }
}
