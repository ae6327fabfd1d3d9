//! End-to-end deployment tests: filesystem discovery through the engine
//! facade, hot reload, anchors, cascades, and policy lifecycle.

use gantry_core::artifact::{ArtifactKind, ArtifactState};
use gantry_core::context::ReachabilityProbe;
use gantry_core::deployer::{DeploymentListener, NoopBuilder};
use gantry_core::engine::{DeploymentEngine, DeploymentService};
use gantry_core::policy::PolicyParametrization;
use gantry_core::types::{
    ArtifactId, ArtifactLayout, EngineConfig, OperationId, PolicyId, WatcherConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn aid(s: &str) -> ArtifactId {
    ArtifactId::from_string(s.to_string()).expect("artifact id")
}

fn pid(s: &str) -> PolicyId {
    PolicyId::from_string(s.to_string()).expect("policy id")
}

/// Helper: engine over a temp workspace with a fast watcher interval.
fn test_engine() -> (tempfile::TempDir, DeploymentEngine) {
    let dir = tempfile::tempdir().expect("create tempdir");
    let layout = ArtifactLayout::new(dir.path());
    let config = EngineConfig {
        watcher: WatcherConfig {
            poll_interval: Duration::from_millis(50),
            ..Default::default()
        },
        ..Default::default()
    };
    let engine =
        DeploymentEngine::new(layout, config, Arc::new(NoopBuilder)).expect("create engine");
    (dir, engine)
}

/// Helper: write an exploded artifact directory.
fn explode(engine: &DeploymentEngine, kind: ArtifactKind, name: &str, json: Option<&str>) {
    let dir = engine.layout().artifacts_dir(kind).join(name);
    std::fs::create_dir_all(&dir).expect("create artifact dir");
    std::fs::write(dir.join("content.xml"), "<flow/>").expect("write content");
    if let Some(json) = json {
        std::fs::write(dir.join("artifact.json"), json).expect("write descriptor");
    }
}

/// Helper: poll until the artifact reaches the wanted state (or not).
async fn await_state(
    engine: &DeploymentEngine,
    id: &ArtifactId,
    wanted: Option<ArtifactState>,
) -> bool {
    for _ in 0..100 {
        let current = engine
            .applications()
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.state);
        if current == wanted {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl DeploymentListener for RecordingListener {
    fn on_deployment_start(&self, id: &ArtifactId) -> gantry_core::Result<()> {
        self.events.lock().unwrap().push(format!("start:{id}"));
        Ok(())
    }
    fn on_deployment_success(&self, id: &ArtifactId) {
        self.events.lock().unwrap().push(format!("success:{id}"));
    }
    fn on_deployment_failure(&self, id: &ArtifactId, cause: &gantry_core::Error) {
        self.events
            .lock()
            .unwrap()
            .push(format!("failure:{id}:{cause}"));
    }
    fn on_undeployment_success(&self, id: &ArtifactId) {
        self.events.lock().unwrap().push(format!("undeploy:{id}"));
    }
}

#[tokio::test]
async fn watcher_deploys_and_anchor_removal_undeploys() {
    let (_dir, engine) = test_engine();
    explode(&engine, ArtifactKind::Application, "orders", None);

    let handle = engine.start();
    let id = aid("orders");
    assert!(await_state(&engine, &id, Some(ArtifactState::Deployed)).await);

    let anchor = engine.layout().anchor_path(ArtifactKind::Application, &id);
    assert!(anchor.exists(), "anchor written after deployment completes");

    // External tooling signals undeploy by deleting the anchor.
    std::fs::remove_file(&anchor).expect("remove anchor");
    assert!(await_state(&engine, &id, None).await);

    engine.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn hot_redeploy_swaps_context_without_leaking_the_old_one() {
    let (_dir, engine) = test_engine();
    explode(&engine, ArtifactKind::Application, "orders", None);

    let handle = engine.start();
    let id = aid("orders");
    assert!(await_state(&engine, &id, Some(ArtifactState::Deployed)).await);

    let old = engine
        .deployer()
        .applications()
        .context_of(&id)
        .expect("context");
    let probe = ReachabilityProbe::of(&old);
    drop(old);

    // mtime granularity can be a full second; make the change observable.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    std::fs::write(
        engine
            .layout()
            .artifact_dir(ArtifactKind::Application, &id)
            .join("content.xml"),
        "<flow name='v2'/>",
    )
    .expect("rewrite content");

    assert!(
        probe.await_collected(Duration::from_secs(5)).await,
        "old context must be collectible after hot redeploy"
    );
    assert!(await_state(&engine, &id, Some(ArtifactState::Deployed)).await);

    engine.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn undeploy_api_removes_native_folder_and_notifies() {
    let (_dir, engine) = test_engine();
    explode(&engine, ArtifactKind::Application, "orders", None);

    let listener = Arc::new(RecordingListener::default());
    engine.register_listener(ArtifactKind::Application, listener.clone());

    let id = aid("orders");
    engine
        .deploy_application(&engine.layout().artifact_dir(ArtifactKind::Application, &id))
        .await
        .expect("deploy");

    let descriptor = engine
        .deployer()
        .applications()
        .descriptor_of(&id)
        .expect("descriptor");
    let native = engine.layout().native_libs_dir(&descriptor.native_libs_folder);
    assert!(native.is_dir());

    engine.undeploy_application(&id).await.expect("undeploy");

    assert!(!native.exists());
    assert_eq!(
        listener.events(),
        vec!["start:orders", "success:orders", "undeploy:orders"]
    );
}

#[tokio::test]
async fn domain_cascade_through_engine_api() {
    let (_dir, engine) = test_engine();
    explode(&engine, ArtifactKind::Domain, "shared", None);
    explode(
        &engine,
        ArtifactKind::Application,
        "orders",
        Some(r#"{"domain": "shared"}"#),
    );

    let shared = aid("shared");
    let orders = aid("orders");
    engine
        .deploy_domain(&engine.layout().artifact_dir(ArtifactKind::Domain, &shared))
        .await
        .expect("deploy domain");
    engine
        .deploy_application(&engine.layout().artifact_dir(ArtifactKind::Application, &orders))
        .await
        .expect("deploy app");

    engine.undeploy_domain(&shared).await.expect("cascade");

    assert!(engine.applications().is_empty());
    assert!(engine.domains().is_empty());

    // Undeploying it again is an immediate error.
    assert!(engine.undeploy_domain(&shared).await.is_err());
}

#[tokio::test]
async fn policy_redeploy_keeps_sibling_operational() {
    let (_dir, engine) = test_engine();
    explode(&engine, ArtifactKind::Application, "x", None);

    let app = aid("x");
    engine
        .deploy_application(&engine.layout().artifact_dir(ArtifactKind::Application, &app))
        .await
        .expect("deploy");

    engine
        .add_policy(&app, PolicyParametrization::new(pid("p1"), 1))
        .expect("add p1");
    engine
        .add_policy(&app, PolicyParametrization::new(pid("p2"), 2))
        .expect("add p2");

    let op = OperationId::from_string("op".to_string()).expect("op id");
    let executions = Arc::new(AtomicUsize::new(0));

    // Execute the operation twice through the two-policy composite.
    {
        let instance = engine.operation_policy(&app, &op).expect("policy");
        for _ in 0..2 {
            instance
                .execute(|| executions.fetch_add(1, Ordering::SeqCst))
                .expect("execute");
        }
    }
    assert_eq!(executions.load(Ordering::SeqCst), 2);

    // Remove P1; the stale composite must become collectible.
    let stale = Arc::downgrade(&engine.operation_policy(&app, &op).expect("policy"));
    engine
        .remove_policy(&app, &pid("p1"))
        .expect("remove p1");
    for _ in 0..200 {
        if stale.upgrade().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(stale.upgrade().is_none());

    // The sibling still executes.
    engine
        .operation_policy(&app, &op)
        .expect("policy")
        .execute(|| executions.fetch_add(1, Ordering::SeqCst))
        .expect("execute");
    assert_eq!(executions.load(Ordering::SeqCst), 3);

    // Re-add P1 and execute twice through the rebuilt chain.
    engine
        .add_policy(&app, PolicyParametrization::new(pid("p1"), 1))
        .expect("re-add p1");
    {
        let instance = engine.operation_policy(&app, &op).expect("policy");
        assert_eq!(instance.chain().len(), 2);
        for _ in 0..2 {
            instance
                .execute(|| executions.fetch_add(1, Ordering::SeqCst))
                .expect("execute");
        }
    }
    assert_eq!(executions.load(Ordering::SeqCst), 5);
}
