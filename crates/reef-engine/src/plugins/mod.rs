//! Internal processors and the plugin catalog
//!
//! The DSP here is deliberately small; these exist so the host has real
//! processors to load, route, automate and bypass. Third-party formats
//! (vst2x/vst3x/lv2) register their loaders in the same catalog; none are
//! compiled into this build.

mod equalizer;
mod gain;
mod mono_summer;
mod passthrough;

pub use equalizer::Equalizer;
pub use gain::Gain;
pub use mono_summer::MonoSummer;
pub use passthrough::Passthrough;

use std::collections::HashMap;

use reef_core::{EngineError, EngineResult};

use crate::processor::Processor;

/// Which loader a plugin entry goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    Internal,
    Vst2x,
    Vst3x,
    Lv2,
}

type PluginFactory = fn(name: &str, label: &str) -> Box<dyn Processor>;

/// Registry of loadable processors, keyed by uid
pub struct PluginCatalog {
    factories: HashMap<&'static str, PluginFactory>,
}

impl PluginCatalog {
    /// Catalog with every built-in processor registered
    pub fn with_internal_plugins() -> Self {
        let mut factories: HashMap<&'static str, PluginFactory> = HashMap::new();
        factories.insert(Passthrough::UID, |name, label| {
            Box::new(Passthrough::new(name, label))
        });
        factories.insert(Gain::UID, |name, label| Box::new(Gain::new(name, label)));
        factories.insert(Equalizer::UID, |name, label| {
            Box::new(Equalizer::new(name, label))
        });
        factories.insert(MonoSummer::UID, |name, label| {
            Box::new(MonoSummer::new(name, label))
        });
        Self { factories }
    }

    /// Instantiate a processor for a configured plugin entry
    pub fn create(
        &self,
        kind: PluginType,
        uid: &str,
        name: &str,
        path: &str,
    ) -> EngineResult<Box<dyn Processor>> {
        match kind {
            PluginType::Internal => match self.factories.get(uid) {
                Some(factory) => Ok(factory(name, name)),
                None => Err(EngineError::InvalidPluginUid(uid.to_string())),
            },
            // No dynamic loaders are compiled into this build; their
            // entries fail the same way a bad binary path would
            PluginType::Vst2x | PluginType::Vst3x | PluginType::Lv2 => {
                Err(EngineError::InvalidPluginPath(path.to_string()))
            }
        }
    }

    pub fn known_uids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::with_internal_plugins()
    }
}
