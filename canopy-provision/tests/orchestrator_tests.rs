//! Pipeline tests against in-memory collaborators

mod common;

use canopy_common::{PhaseKind, RunState};
use canopy_provision::validation::ValidationError;
use canopy_provision::{Orchestrator, ProvisionError};
use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_phase2_failure_after_flaky_host() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(2, tmp.path());

    let mut fakes = Fakes::new(2);
    fakes.liveness = Arc::new(FlakyLiveness::failing(HOST_URL, 3));
    fakes.installer = Arc::new(ScriptedInstaller::failing("tenant-1-rancher"));

    let mut orchestrator = Orchestrator::new(config, fakes.collaborators());
    let err = orchestrator.run().await.unwrap_err();

    match &err {
        ProvisionError::Phase2(failure) => {
            assert_eq!(failure.ordinals(), vec![1]);
            assert!(failure.to_string().contains("tenant 1"));
        }
        other => panic!("expected a Phase 2 failure, got {other}"),
    }

    let report = orchestrator.report();
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert!(report.host_ready);
    assert!(report.phase_succeeded(PhaseKind::Import, 1));
    assert!(!report.phase_succeeded(PhaseKind::Install, 1));
    assert_eq!(fakes.liveness.calls_for(HOST_URL), 4);
    assert_eq!(fakes.infra.apply_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_phase2_failure_is_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(4, tmp.path());

    let mut fakes = Fakes::new(4);
    fakes.installer = Arc::new(ScriptedInstaller::failing("tenant-2-rancher"));

    let mut orchestrator = Orchestrator::new(config, fakes.collaborators());
    let err = orchestrator.run().await.unwrap_err();

    let ProvisionError::Phase2(failure) = err else {
        panic!("expected a Phase 2 failure");
    };
    assert_eq!(failure.failures.len(), 1);
    assert_eq!(failure.ordinals(), vec![2]);

    let report = orchestrator.report();
    assert_eq!(report.phase2.len(), 3);
    assert!(report.phase2.iter().find(|r| r.ordinal == 1).unwrap().succeeded);
    assert!(report.phase2.iter().find(|r| r.ordinal == 3).unwrap().succeeded);

    // tenants 1 and 3 ran to completion, including their liveness waits
    assert_eq!(
        fakes.installer.installed_names(),
        vec!["host-rancher", "tenant-1-rancher", "tenant-2-rancher", "tenant-3-rancher"]
    );
    assert_eq!(fakes.liveness.calls_for(&tenant_url(1)), 1);
    assert_eq!(fakes.liveness.calls_for(&tenant_url(3)), 1);
    assert_eq!(fakes.liveness.calls_for(&tenant_url(2)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_full_run_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(3, tmp.path());
    let work_dir = config.paths.work_dir.clone();

    let fakes = Fakes::new(3);
    let mut orchestrator = Orchestrator::new(config, fakes.collaborators());
    let report = orchestrator.run().await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.host_url.as_deref(), Some(HOST_URL));
    assert_eq!(report.tenant_urls.get(&2), Some(&tenant_url(2)));
    assert_eq!(report.imports.len(), 2);
    assert!(report.imports.iter().all(|r| r.is_active() && r.manifest_url.is_some()));
    assert_eq!(*fakes.management.registered.lock().unwrap(), vec![1, 2]);
    assert_eq!(fakes.management.terms_accepted.load(Ordering::SeqCst), 1);
    assert_eq!(fakes.state.uploads.lock().unwrap().len(), 1);

    // import manifest applied on the tenant's own node
    let tenant1 = fakes.remote.commands_on(node1(2));
    assert!(tenant1
        .iter()
        .any(|c| c.contains("imported-tenant-1.yaml") && c.contains("k3s kubectl apply")));
    assert!(!fakes
        .remote
        .commands_on(node1(1))
        .iter()
        .any(|c| c.contains("kubectl apply")));

    let tenant_dir = work_dir.join("tenant-1-rancher");
    for artifact in ["install.sh", "kube_config.yaml", "import.sh"] {
        assert!(tenant_dir.join(artifact).exists(), "{artifact} missing");
    }
    let kubeconfig = std::fs::read_to_string(tenant_dir.join("kube_config.yaml")).unwrap();
    assert!(kubeconfig.contains("https://10.0.2.1:6443"));
    let script = std::fs::read_to_string(tenant_dir.join("install.sh")).unwrap();
    assert!(script.contains("--set hostname=tenant1.example.com"));
}

#[tokio::test(start_paused = true)]
async fn test_phase1_failure_halts_run() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(3, tmp.path());

    let mut fakes = Fakes::new(3);
    fakes.management = Arc::new(ScriptedManagement {
        manifest_fails_for: Some(1),
        ..Default::default()
    });

    let mut orchestrator = Orchestrator::new(config, fakes.collaborators());
    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, ProvisionError::Phase1 { ordinal: 1, .. }));
    assert_eq!(err.tenant_ordinal(), Some(1));
    assert_eq!(*fakes.management.registered.lock().unwrap(), vec![1]);
    assert!(orchestrator.report().phase2.is_empty());
    assert_eq!(fakes.installer.installed_names(), vec!["host-rancher"]);
}

#[tokio::test]
async fn test_validation_failure_never_touches_infra() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(3, tmp.path());
    config.k3s.versions.pop();

    let fakes = Fakes::new(3);
    let mut orchestrator = Orchestrator::new(config, fakes.collaborators());
    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Validation(ValidationError::CountMismatch { expected: 3, actual: 2, .. })
    ));
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert_eq!(fakes.infra.apply_calls.load(Ordering::SeqCst), 0);
    assert!(fakes.remote.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_out_of_range_topology_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let fakes = Fakes::new(5);

    for total in [1, 5] {
        let orchestrator = Orchestrator::new(test_config(total, tmp.path()), fakes.collaborators());
        let err = orchestrator.validate().await.unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(ValidationError::InstanceCount { got }) if got == total));
    }
    assert_eq!(fakes.infra.apply_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_existing_state_blocks_run() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(2, tmp.path());

    let mut fakes = Fakes::new(2);
    fakes.state = Arc::new(MemoryState::with_object("terraform.tfstate"));

    let mut orchestrator = Orchestrator::new(config, fakes.collaborators());
    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Validation(ValidationError::StateAlreadyExists { .. })
    ));
    assert_eq!(fakes.infra.apply_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_caller_ip_mismatch() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(2, tmp.path());
    config.network.allowed_ip = Some("203.0.113.50".parse().unwrap());

    let fakes = Fakes::new(2);
    let orchestrator = Orchestrator::new(config, fakes.collaborators());
    let err = orchestrator.validate().await.unwrap_err();

    assert!(err.to_string().contains("203.0.113.50"));
    assert!(err.to_string().contains("198.51.100.1"));
}

#[tokio::test(start_paused = true)]
async fn test_host_login_retried_until_accepted() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(2, tmp.path());

    let mut fakes = Fakes::new(2);
    fakes.management = Arc::new(ScriptedManagement::rejecting_logins(3));

    let mut orchestrator = Orchestrator::new(config, fakes.collaborators());
    let report = orchestrator.run().await.unwrap();

    assert!(report.host_ready);
    assert_eq!(fakes.management.auth_calls.load(Ordering::SeqCst), 4);
    let session = orchestrator.session().unwrap();
    assert_eq!(session.admin_password(), "hunter2");
    assert_eq!(session.token().as_str(), "token-abc:long");
}

#[tokio::test(start_paused = true)]
async fn test_host_login_timeout_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(3, tmp.path());

    let mut fakes = Fakes::new(3);
    fakes.management = Arc::new(ScriptedManagement::rejecting_logins(usize::MAX));

    let mut orchestrator = Orchestrator::new(config, fakes.collaborators());
    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, ProvisionError::Timeout(_)));
    assert_eq!(err.tenant_ordinal(), None);
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert!(orchestrator.session().is_none());

    let report = orchestrator.report();
    assert!(!report.host_ready);
    assert!(report.phase1.is_empty());
    assert!(report.imports.is_empty());
    assert!(fakes.management.registered.lock().unwrap().is_empty());
    assert_eq!(fakes.management.terms_accepted.load(Ordering::SeqCst), 0);
    // no tenant was bootstrapped
    assert!(fakes.remote.commands_on(node1(2)).is_empty());
    assert!(fakes.remote.commands_on(node1(3)).is_empty());
}
