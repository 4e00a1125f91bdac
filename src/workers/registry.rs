//! Explicit worker registration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::workers::worker::Worker;

/// Registry of named workers.
///
/// Populated at startup via [`register`](Self::register) and frozen before
/// the agent starts; the coordination core only ever resolves names.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its own name. Registering the same name twice
    /// replaces the earlier worker.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        let name = worker.name().to_owned();
        if self.workers.insert(name.clone(), worker).is_some() {
            tracing::warn!(worker = %name, "replaced a previously registered worker");
        } else {
            tracing::debug!(worker = %name, "registered worker");
        }
    }

    /// Resolve a worker by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// `(name, version)` pairs for the startup handshake, sorted by name.
    pub fn manifest(&self) -> Vec<(String, String)> {
        let mut manifest: Vec<(String, String)> = self
            .workers
            .values()
            .map(|worker| (worker.name().to_owned(), worker.version().to_owned()))
            .collect();
        manifest.sort();
        manifest
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::error::Result;
    use crate::job::Job;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Worker for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn version(&self) -> &str {
            self.1
        }

        async fn run(&self, _job: &Arc<Job>) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn resolves_registered_workers() {
        let mut registry = WorkerRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(Named("resize", "1.2.0")));
        registry.register(Arc::new(Named("transcode", "0.3.1")));

        assert_eq!(registry.count(), 2);
        assert!(registry.has("resize"));
        assert!(registry.get("transcode").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn reregistering_replaces() {
        let mut registry = WorkerRegistry::new();
        registry.register(Arc::new(Named("resize", "1.0.0")));
        registry.register(Arc::new(Named("resize", "2.0.0")));

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("resize").unwrap().version(), "2.0.0");
    }

    #[test]
    fn manifest_is_sorted() {
        let mut registry = WorkerRegistry::new();
        registry.register(Arc::new(Named("transcode", "0.3.1")));
        registry.register(Arc::new(Named("resize", "1.2.0")));

        assert_eq!(
            registry.manifest(),
            vec![
                ("resize".to_owned(), "1.2.0".to_owned()),
                ("transcode".to_owned(), "0.3.1".to_owned()),
            ]
        );
    }
}
