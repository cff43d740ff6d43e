//! Registry-level placement properties.
//!
//! Exercises the registry end to end against a recording engine and real
//! stores: exclusivity under arbitrary operation sequences, idempotent
//! assignment, removal guards, move ordering, and concurrent callers.

use std::collections::HashSet;
use std::sync::Arc;

use outpost_core::{LOCAL_RUNTIME_SOCKET, Target, ValidationError, WorkloadId, validate_workload_id};
use outpost_registry::*;
use outpost_state::{ConfigStore, JsonFileStore, MemoryStore};

const NODE1: &str = "https://node1.local";
const NODE2: &str = "https://node2.local";
const NODE3: &str = "tcp://node3.lan:2376";

fn id(s: &str) -> WorkloadId {
    validate_workload_id(s).unwrap()
}

fn remote(s: &str) -> Target {
    Target::parse(s).unwrap()
}

fn setup() -> (PlacementRegistry, Arc<MemoryStore>, Arc<RecordingEngine>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(RecordingEngine::new());
    let registry = PlacementRegistry::new(store.clone(), engine.clone());
    (registry, store, engine)
}

/// No workload appears on more than one host.
fn assert_exclusive(registry: &PlacementRegistry) {
    let mut seen = HashSet::new();
    for host in registry.list() {
        for w in host.workloads {
            assert!(seen.insert(w.clone()), "{w} is placed on more than one host");
        }
    }
}

/// Tiny deterministic generator so the sequence test is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

#[tokio::test]
async fn documented_scenario() {
    let (registry, _store, _engine) = setup();

    registry.add_host(NODE1).await.unwrap();
    let hosts = registry.list();
    assert_eq!(hosts.len(), 1);
    assert!(hosts[0].workloads.is_empty());

    registry.assign(&remote(NODE1), &id("my_addon")).await.unwrap();
    let record = registry.lookup(&remote(NODE1)).unwrap().unwrap();
    assert_eq!(record.workloads, vec![id("my_addon")]);

    assert!(matches!(
        registry.remove_host(NODE1, false).await,
        Err(PlacementError::NotEmpty { .. })
    ));

    registry.remove_host(NODE1, true).await.unwrap();
    assert_eq!(registry.placement_of(&id("my_addon")), Target::Local);
}

#[tokio::test]
async fn exclusivity_holds_for_random_sequences() {
    let (registry, _store, engine) = setup();
    let hosts = [NODE1, NODE2, NODE3];
    let workloads = ["a", "b", "c", "d"];
    let mut rng = Lcg(7);

    for _ in 0..300 {
        match rng.next(10) {
            0 => {
                let _ = registry.add_host(hosts[rng.next(hosts.len())]).await;
            }
            1 => {
                let force = rng.next(2) == 0;
                let _ = registry.remove_host(hosts[rng.next(hosts.len())], force).await;
            }
            n => {
                let target = if n == 2 {
                    Target::Local
                } else {
                    remote(hosts[rng.next(hosts.len())])
                };
                let w = id(workloads[rng.next(workloads.len())]);
                let _ = registry.assign(&target, &w).await;
            }
        }
        assert_exclusive(&registry);
    }

    // The engine agrees with the registry.
    let mut expected: Vec<(String, String)> = registry
        .list()
        .into_iter()
        .flat_map(|h| {
            let host = h.locator.to_string();
            h.workloads
                .into_iter()
                .map(move |w| (host.clone(), w.to_string()))
        })
        .collect();
    let mut running = engine.running();
    expected.sort();
    running.sort();
    assert_eq!(running, expected);
}

#[tokio::test]
async fn assign_is_idempotent() {
    let (registry, store, engine) = setup();
    registry.add_host(NODE1).await.unwrap();

    registry.assign(&remote(NODE1), &id("a")).await.unwrap();
    let once = registry.list();
    let bytes = store.bytes();
    let calls = engine.calls().len();

    registry.assign(&remote(NODE1), &id("a")).await.unwrap();
    assert_eq!(registry.list(), once);
    assert_eq!(store.bytes(), bytes);
    assert_eq!(engine.calls().len(), calls);
}

#[tokio::test]
async fn reserved_locator_rejected_regardless_of_contents() {
    let (registry, _store, _engine) = setup();
    for step in 0..3 {
        assert!(
            matches!(
                registry.add_host(LOCAL_RUNTIME_SOCKET).await,
                Err(PlacementError::Validation(ValidationError::ReservedLocator(_)))
            ),
            "step {step}"
        );
        match step {
            0 => {
                registry.add_host(NODE1).await.unwrap();
            }
            1 => registry.assign(&remote(NODE1), &id("a")).await.unwrap(),
            _ => {}
        }
    }
}

#[tokio::test]
async fn removal_guard() {
    let (registry, store, engine) = setup();
    registry.add_host(NODE1).await.unwrap();
    registry.assign(&remote(NODE1), &id("a")).await.unwrap();
    registry.assign(&remote(NODE1), &id("b")).await.unwrap();
    let before = registry.list();
    let bytes = store.bytes();

    assert!(matches!(
        registry.remove_host(NODE1, false).await,
        Err(PlacementError::NotEmpty { count: 2, .. })
    ));
    assert_eq!(registry.list(), before);
    assert_eq!(store.bytes(), bytes);

    let removed = registry.remove_host(NODE1, true).await.unwrap();
    assert_eq!(removed.state, HostState::Removed);
    assert!(matches!(
        registry.lookup(&remote(NODE1)),
        Err(PlacementError::HostNotFound(_))
    ));
    assert_eq!(registry.placement_of(&id("a")), Target::Local);
    assert_eq!(registry.placement_of(&id("b")), Target::Local);
    assert!(engine.running().is_empty());
    assert!(store.load().unwrap().is_empty());
}

#[tokio::test]
async fn move_detaches_then_attaches_once() {
    let (registry, _store, engine) = setup();
    registry.add_host(NODE1).await.unwrap();
    registry.add_host(NODE2).await.unwrap();
    registry.assign(&remote(NODE1), &id("w")).await.unwrap();
    engine.clear_calls();

    registry.assign(&remote(NODE2), &id("w")).await.unwrap();

    let a = registry.lookup(&remote(NODE1)).unwrap().unwrap();
    let b = registry.lookup(&remote(NODE2)).unwrap().unwrap();
    assert!(!a.workloads.contains(&id("w")));
    assert!(b.workloads.contains(&id("w")));

    let moves: Vec<EngineCall> = engine
        .calls()
        .into_iter()
        .filter(|c| matches!(c, EngineCall::Attach { .. } | EngineCall::Detach { .. }))
        .collect();
    assert_eq!(
        moves,
        vec![
            EngineCall::Detach {
                host: NODE1.into(),
                workload: "w".into()
            },
            EngineCall::Attach {
                host: NODE2.into(),
                workload: "w".into()
            },
        ]
    );
}

#[tokio::test]
async fn file_store_round_trip_is_fixed_point() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("placements.json");
    let store = Arc::new(JsonFileStore::new(&path));
    let engine = Arc::new(RecordingEngine::new());

    {
        let registry = PlacementRegistry::new(store.clone(), engine.clone());
        registry.add_host(NODE2).await.unwrap();
        registry.add_host(NODE1).await.unwrap();
        registry.assign(&remote(NODE1), &id("b")).await.unwrap();
        registry.assign(&remote(NODE1), &id("a")).await.unwrap();
        registry.shutdown().await;
    }
    let bytes = std::fs::read(&path).unwrap();

    store.save(&store.load().unwrap()).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), bytes);

    let (registry, report) =
        PlacementRegistry::load(store.clone(), Arc::new(RecordingEngine::new()), &StaticCatalog::any())
            .await
            .unwrap();
    assert!(report.is_clean());
    let hosts = registry.list();
    assert_eq!(hosts[0].locator.as_str(), NODE2);
    assert_eq!(hosts[1].workloads, vec![id("b"), id("a")]);

    registry.flush().await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assigns_of_one_workload_serialize() {
    let (registry, store, engine) = setup();
    for host in [NODE1, NODE2, NODE3] {
        registry.add_host(host).await.unwrap();
    }

    let mut tasks = Vec::new();
    for i in 0..24 {
        let registry = registry.clone();
        let target = match i % 4 {
            0 => Target::Local,
            1 => remote(NODE1),
            2 => remote(NODE2),
            _ => remote(NODE3),
        };
        tasks.push(tokio::spawn(async move {
            registry.assign(&target, &id("shared")).await
        }));
    }

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    assert_exclusive(&registry);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }

    assert_exclusive(&registry);
    let running: Vec<_> = engine
        .running()
        .into_iter()
        .filter(|(_, w)| w == "shared")
        .collect();
    match registry.placement_of(&id("shared")) {
        Target::Local => assert!(running.is_empty()),
        Target::Remote(host) => assert_eq!(running, vec![(host.to_string(), "shared".to_string())]),
    }

    // The document matches memory.
    let raw = store.load().unwrap();
    for host in registry.list() {
        let expected: Vec<String> = host.workloads.iter().map(|w| w.to_string()).collect();
        assert_eq!(raw.hosts[host.locator.as_str()], expected);
    }
}
