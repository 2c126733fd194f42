//! Model name to graph mapping
//!
//! The single source of desired state between the graph and REST layers.
//! A model saved as `None` means "delete everything this model owns"; the
//! entry itself is removed only after the REST layer finishes the teardown.

use std::sync::Arc;

use dashmap::DashMap;

use super::ObjectGraph;

/// Thread-safe map of model name to desired graph.
#[derive(Default)]
pub struct GraphLister {
    models: DashMap<String, Option<Arc<ObjectGraph>>>,
}

impl GraphLister {
    /// Fresh empty lister.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Save a model's graph (`None` marks it for deletion).
    pub fn save(&self, model_name: &str, graph: Option<Arc<ObjectGraph>>) {
        self.models.insert(model_name.to_string(), graph);
    }

    /// Look a model up. Outer `None` means the model was never saved.
    pub fn get(&self, model_name: &str) -> Option<Option<Arc<ObjectGraph>>> {
        self.models.get(model_name).map(|e| e.value().clone())
    }

    /// Remove a model entirely (after REST teardown completes).
    pub fn delete(&self, model_name: &str) {
        self.models.remove(model_name);
    }

    /// Snapshot of every model and its graph.
    pub fn get_all(&self) -> Vec<(String, Option<Arc<ObjectGraph>>)> {
        self.models
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// All model names.
    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of tracked models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no models are tracked.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Whether every tracked model is marked deleted (`None`, empty, or a
    /// route-less VRF graph).
    pub fn all_deleted(&self) -> bool {
        self.models
            .iter()
            .all(|e| e.value().as_ref().map_or(true, |g| g.is_deletion_state()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_get_delete_round_trip() {
        let lister = GraphLister::new();
        let graph = Arc::new(ObjectGraph::empty("admin/c1--red-svc"));
        lister.save("admin/c1--red-svc", Some(graph));
        assert!(lister.get("admin/c1--red-svc").is_some());
        assert!(lister.get("admin/unknown").is_none());
        lister.delete("admin/c1--red-svc");
        assert!(lister.get("admin/c1--red-svc").is_none());
    }

    #[test]
    fn nil_save_is_distinct_from_absent() {
        let lister = GraphLister::new();
        lister.save("admin/m", None);
        // Found, but marked deleted.
        assert!(matches!(lister.get("admin/m"), Some(None)));
    }

    #[test]
    fn all_deleted_tracks_delete_sync_progress() {
        let lister = GraphLister::new();
        lister.save("admin/a", None);
        lister.save("admin/b", Some(Arc::new(ObjectGraph::empty("admin/b"))));
        assert!(lister.all_deleted());

        let live = Arc::new(ObjectGraph::new(
            "admin/c",
            Some(super::super::GraphRoot::Vs(super::super::AviVsNode {
                name: "c1--c".to_string(),
                ..Default::default()
            })),
        ));
        lister.save("admin/c", Some(live));
        assert!(!lister.all_deleted());
    }
}
