use ltoffice_cache::{
    identity_from_url, AnalysisCacheBundle, BincodeCodec, CacheConfig, CacheCoordinator,
    CleanupExecutor, IndexStore,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Layer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DocumentCache {
    paragraphs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ResultCache {
    matches: Vec<(usize, usize, String)>,
}

type Bundle = AnalysisCacheBundle<DocumentCache, ResultCache>;
type Coordinator = CacheCoordinator<BincodeCodec<Bundle>>;

fn bundle(paragraphs: usize) -> Bundle {
    AnalysisCacheBundle::new(
        DocumentCache {
            paragraphs: (0..paragraphs).map(|i| format!("Paragraph {i}.")).collect(),
        },
        ResultCache {
            matches: vec![(0, 9, "UPPERCASE_SENTENCE_START".to_string())],
        },
        vec![
            ResultCache { matches: vec![] },
            ResultCache {
                matches: vec![(3, 2, "DOUBLE_PUNCTUATION".to_string())],
            },
        ],
    )
}

struct Fixture {
    tmp: tempfile::TempDir,
    coordinator: Coordinator,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = CacheCoordinator::new(
            &CacheConfig::with_cache_dir(tmp.path().join("cache")),
            BincodeCodec::new(),
            CleanupExecutor::new().unwrap(),
        )
        .unwrap();
        Self { tmp, coordinator }
    }

    fn doc(&self, name: &str) -> PathBuf {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, b"<office:document/>").unwrap();
        path
    }

    fn cache_file(&self, name: &str) -> PathBuf {
        self.coordinator.dir().cache_file_path(name)
    }

    fn index_entries(&self) -> Vec<(String, String)> {
        IndexStore::open(self.coordinator.dir().clone())
            .index()
            .iter()
            .map(|(doc, name)| (doc.to_string(), name.to_string()))
            .collect()
    }

    fn settle(&self) {
        assert!(self
            .coordinator
            .executor()
            .wait_idle(Duration::from_secs(10)));
    }
}

fn doc_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn save_then_load_restores_the_bundle() {
    let mut fx = Fixture::new();
    let doc = fx.doc("letter.odt");

    fx.coordinator.save(&doc, bundle(40), 40);
    assert!(fx.cache_file("LtCache1.lcz").is_file());

    fx.coordinator.reset();
    let loaded = fx.coordinator.load(&doc).unwrap();
    assert_eq!(*loaded, bundle(40));
    assert_eq!(loaded.document_cache().paragraphs.len(), 40);
    assert_eq!(loaded.paragraphs_cache().len(), 2);
    fx.settle();

    // The cleanup pass queued by `load` keeps the live entry.
    assert!(fx.cache_file("LtCache1.lcz").is_file());
    assert_eq!(fx.index_entries(), vec![(doc_id(&doc), "LtCache1.lcz".to_string())]);
}

#[test]
fn miss_then_create() {
    let mut fx = Fixture::new();
    let doc = fx.doc("new.odt");

    assert!(fx.coordinator.load(&doc).is_none());
    assert!(fx.index_entries().is_empty());

    fx.coordinator.save(&doc, bundle(50), 50);

    assert_eq!(fx.index_entries(), vec![(doc_id(&doc), "LtCache1.lcz".to_string())]);
    let payloads: Vec<_> = std::fs::read_dir(fx.coordinator.dir().root())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".lcz"))
        .collect();
    assert_eq!(payloads, vec!["LtCache1.lcz".to_string()]);
}

#[test]
fn small_documents_are_not_cached() {
    let mut fx = Fixture::new();
    let doc = fx.doc("memo.odt");

    fx.coordinator.save(&doc, bundle(5), 5);

    assert!(!fx.cache_file("LtCache1.lcz").exists());
    assert!(fx.index_entries().is_empty());
}

#[test]
fn shrinking_below_threshold_deletes_existing_payload() {
    let mut fx = Fixture::new();
    let doc = fx.doc("report.odt");
    let other = fx.doc("other.odt");

    fx.coordinator.save(&doc, bundle(40), 40);
    fx.coordinator.save(&other, bundle(40), 40);
    let before = std::fs::read(fx.cache_file("LtCache1.lcz")).unwrap();
    assert!(!before.is_empty());

    fx.coordinator.save(&doc, bundle(29), 29);

    assert!(!fx.cache_file("LtCache1.lcz").exists());
    assert!(fx.cache_file("LtCache2.lcz").is_file());
    fx.coordinator.reset();
    assert!(fx.coordinator.load(&doc).is_none());
    assert!(fx.coordinator.load(&other).is_some());
    fx.settle();

    // The dangling mapping is reaped by cleanup.
    assert_eq!(
        fx.index_entries(),
        vec![(doc_id(&other), "LtCache2.lcz".to_string())]
    );
}

#[test]
fn load_reclaims_deleted_documents_in_background() {
    let mut fx = Fixture::new();
    let kept = fx.doc("kept.odt");
    let deleted = fx.doc("deleted.odt");

    fx.coordinator.save(&kept, bundle(30), 30);
    fx.coordinator.save(&deleted, bundle(30), 30);
    std::fs::remove_file(&deleted).unwrap();
    std::fs::write(fx.cache_file("LtCache7.lcz"), b"untracked").unwrap();

    assert!(fx.coordinator.load(&kept).is_some());
    fx.settle();

    assert!(fx.cache_file("LtCache1.lcz").is_file());
    assert!(!fx.cache_file("LtCache2.lcz").exists());
    assert!(!fx.cache_file("LtCache7.lcz").exists());
    assert!(fx.coordinator.dir().index_path().is_file());
    assert_eq!(fx.index_entries(), vec![(doc_id(&kept), "LtCache1.lcz".to_string())]);
}

#[test]
fn corrupt_payload_is_a_cache_miss() {
    let mut fx = Fixture::new();
    let doc = fx.doc("broken.odt");
    fx.coordinator.save(&doc, bundle(40), 40);
    std::fs::write(fx.cache_file("LtCache1.lcz"), b"garbage").unwrap();
    fx.coordinator.reset();

    assert!(fx.coordinator.load(&doc).is_none());
    assert!(fx.coordinator.bundle().is_none());
}

#[test]
fn distinct_documents_get_distinct_files() {
    let mut fx = Fixture::new();
    let docs: Vec<_> = (0..8).map(|i| fx.doc(&format!("doc{i}.odt"))).collect();

    for doc in &docs {
        fx.coordinator.save(doc, bundle(30), 30);
    }

    let entries = fx.index_entries();
    assert_eq!(entries.len(), docs.len());
    let mut names: Vec<_> = entries.iter().map(|(_, name)| name.clone()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), docs.len());
    for name in &names {
        assert!(fx.cache_file(name).is_file(), "{name}");
    }
}

#[cfg(unix)]
#[test]
fn file_url_identity_matches_path_identity() {
    let mut fx = Fixture::new();
    let doc = fx.doc("My Letter.odt");
    let url = url::Url::from_file_path(&doc).unwrap();

    let identity = identity_from_url(url.as_str()).unwrap();
    assert_eq!(identity, doc_id(&doc));

    fx.coordinator.save(&url, bundle(30), 30);
    fx.coordinator.reset();
    assert!(fx.coordinator.load(identity.as_str()).is_some());
    fx.settle();
}

#[derive(Clone, Default)]
struct CapturingLayer {
    events: Arc<Mutex<Vec<(tracing::Level, HashMap<String, String>)>>>,
}

impl<S: tracing::Subscriber> Layer<S> for CapturingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != "ltoffice.cache" {
            return;
        }
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .expect("events mutex poisoned")
            .push((*event.metadata().level(), visitor.fields));
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }
}

#[test]
fn corrupt_index_is_logged_and_treated_as_empty() {
    let mut fx = Fixture::new();
    let doc = fx.doc("a.odt");
    fx.coordinator.save(&doc, bundle(40), 40);
    std::fs::write(fx.coordinator.dir().index_path(), b"corrupt").unwrap();
    fx.coordinator.reset();

    let layer = CapturingLayer::default();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    let loaded = tracing::subscriber::with_default(subscriber, || fx.coordinator.load(&doc));

    assert!(loaded.is_none());
    let events = layer.events.lock().unwrap();
    assert!(
        events.iter().any(|(level, fields)| *level == tracing::Level::WARN
            && fields
                .get("message")
                .is_some_and(|m| m.contains("failed to read cache index"))),
        "events: {:?}",
        events
            .iter()
            .map(|(_, fields)| fields.get("message").cloned())
            .collect::<Vec<_>>()
    );
}
