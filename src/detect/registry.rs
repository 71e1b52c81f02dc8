use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};

use crate::config::DetectorSettings;

use super::backend::DetectorBackend;
use super::backends::StubBackend;

type BackendFactory = Box<dyn Fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>>>;

/// Registry of detector backend constructors, selected by name at startup.
pub struct BackendRegistry {
    factories: BTreeMap<&'static str, BackendFactory>,
    default_name: Option<&'static str>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "backend-tract")]
        registry.register("tract", |settings| {
            let backend = super::backends::TractBackend::new(
                &settings.model_path,
                settings.input_size,
            )?
            .with_iou_threshold(settings.iou_threshold);
            Ok(Box::new(backend) as Box<dyn DetectorBackend>)
        });
        registry.register("stub", |_| Ok(Box::new(StubBackend::new()) as Box<dyn DetectorBackend>));
        registry
    }

    /// Register a constructor. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>> + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name);
        }
        self.factories.insert(name, Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let (key, _) = self
            .factories
            .get_key_value(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        self.default_name = Some(*key);
        Ok(())
    }

    pub fn default_name(&self) -> Option<&'static str> {
        self.default_name
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Construct the backend named in `settings` (or the default when the name is empty)
    /// and warm it up.
    pub fn build(&self, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
        let name = if settings.backend.trim().is_empty() {
            self.default_name
                .ok_or_else(|| anyhow!("no detector backends registered"))?
        } else {
            settings.backend.trim()
        };
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "detector backend '{}' is not available in this build (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        let mut backend =
            factory(settings).with_context(|| format!("load detector backend '{}'", name))?;
        backend
            .warm_up()
            .with_context(|| format!("warm up detector backend '{}'", name))?;
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
