//! End-to-end reconciliation scenarios against the in-memory backend
//!
//! Each test wires the processors and dispatcher the way `apply` does and drives one
//! dispatch, then inspects the report, the dependency graphs and the backend calls.

use std::sync::Arc;
use std::time::Duration;

use tracing_test::traced_test;
use vault_reconcile::config::DispatchConfig;
use vault_reconcile::dependency::{EdgeStatus, Identified, NodeKey, NodeState};
use vault_reconcile::domain::{
    Issuer, Password, PasswordPolicy, PkiRole, ResourceKind, SecretsEngine,
};
use vault_reconcile::observability::Outcome;
use vault_reconcile::secrets::{BackendCall, BackendError, InjectedFailure, MemoryBackend};
use vault_reconcile::{Dispatcher, Error, Processors, Resource};

fn engine(backend: &Arc<MemoryBackend>, max_dispatch: usize) -> (Dispatcher, Processors) {
    let config = DispatchConfig { max_dispatch, fanout_limit: None };
    Dispatcher::for_backend(backend.clone(), &config)
}

fn key(path: &str) -> NodeKey {
    NodeKey::from_path(path)
}

fn root() -> Resource {
    Issuer::root("pki", "root").into()
}

fn intermediate() -> Resource {
    Issuer::intermediate("pki_int", "int", "pki", "root").into()
}

#[tokio::test]
async fn test_root_then_intermediate_creates_both_in_order() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, processors) = engine(&backend, 1);

    let report = dispatcher.dispatch(vec![root(), intermediate()]).await.unwrap();

    assert_eq!(
        report.paths(ResourceKind::Issuer, Outcome::Created),
        vec!["pki/root".to_string(), "pki_int/int".to_string()]
    );

    let graph = processors.issuers.graph();
    let graph = graph.lock().await;
    assert_eq!(graph.edge_status(&key("pki/root"), &key("pki_int/int")), Some(EdgeStatus::Satisfied));
    assert_eq!(graph.node_state(&key("pki_int/int")), Some(NodeState::Materialized));

    let calls = backend.calls().await;
    let root_generated = calls
        .iter()
        .position(|call| matches!(call, BackendCall::GenerateRootIssuer { issuer_name, .. } if issuer_name == "root"))
        .unwrap();
    let signed = calls.iter().position(|call| matches!(call, BackendCall::SignIntermediate { .. })).unwrap();
    assert!(root_generated < signed);
    assert_eq!(backend.issuer_names("pki_int").await, vec!["int".to_string()]);
}

#[tokio::test]
async fn test_intermediate_before_root_waits_for_fulfillment() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, processors) = engine(&backend, 1);

    let report = dispatcher.dispatch(vec![intermediate(), root()]).await.unwrap();

    assert_eq!(
        report.paths(ResourceKind::Issuer, Outcome::Created),
        vec!["pki/root".to_string(), "pki_int/int".to_string()]
    );
    let graph = processors.issuers.graph();
    assert_eq!(graph.lock().await.edge_status(&key("pki/root"), &key("pki_int/int")), Some(EdgeStatus::Satisfied));
}

#[tokio::test]
#[traced_test]
async fn test_undeclared_root_forces_intermediate_at_post_process() {
    let backend = Arc::new(MemoryBackend::new().with_existing_issuer("pki", "root"));
    let (dispatcher, processors) = engine(&backend, 4);

    let report = dispatcher.dispatch(vec![intermediate()]).await.unwrap();

    assert_eq!(report.paths(ResourceKind::Issuer, Outcome::Created), vec!["pki_int/int".to_string()]);
    let graph = processors.issuers.graph();
    assert_eq!(graph.lock().await.edge_status(&key("pki/root"), &key("pki_int/int")), Some(EdgeStatus::Satisfied));
    assert!(logs_contain("Root was never materialized, forcing dependent"));
}

#[tokio::test]
async fn test_forced_attempt_failure_is_marked_forced() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, processors) = engine(&backend, 4);

    let err = dispatcher.dispatch(vec![intermediate()]).await.unwrap_err();

    assert!(err.is_forced());
    assert!(matches!(err.backend_source(), Some(BackendError::NotFound { .. })));
    assert_eq!(err.exit_code(), 1);
    assert!(dispatcher.report().await.is_empty());

    let graph = processors.issuers.graph();
    assert_eq!(graph.lock().await.node_state(&key("pki_int/int")), Some(NodeState::Failed));
}

#[tokio::test]
async fn test_three_level_chain_cascades_in_dependency_order() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, processors) = engine(&backend, 1);
    let sub: Resource = Issuer::intermediate("pki_sub", "sub", "pki_int", "int").into();

    let report = dispatcher.dispatch(vec![root(), intermediate(), sub]).await.unwrap();

    assert_eq!(
        report.paths(ResourceKind::Issuer, Outcome::Created),
        vec!["pki/root".to_string(), "pki_int/int".to_string(), "pki_sub/sub".to_string()]
    );
    let graph = processors.issuers.graph();
    let graph = graph.lock().await;
    assert_eq!(graph.edge_status(&key("pki/root"), &key("pki_int/int")), Some(EdgeStatus::Satisfied));
    assert_eq!(graph.edge_status(&key("pki_int/int"), &key("pki_sub/sub")), Some(EdgeStatus::Satisfied));
}

#[tokio::test]
async fn test_chain_declared_leaf_first_still_cascades() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, _processors) = engine(&backend, 1);
    let sub: Resource = Issuer::intermediate("pki_sub", "sub", "pki_int", "int").into();

    let report = dispatcher.dispatch(vec![sub, intermediate(), root()]).await.unwrap();

    assert_eq!(
        report.paths(ResourceKind::Issuer, Outcome::Created),
        vec!["pki/root".to_string(), "pki_int/int".to_string(), "pki_sub/sub".to_string()]
    );
}

#[tokio::test]
async fn test_duplicate_declaration_is_rejected_not_overwritten() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, _processors) = engine(&backend, 1);

    let err = dispatcher.dispatch(vec![root(), root()]).await.unwrap_err();

    assert!(matches!(err, Error::DuplicateResource { kind: ResourceKind::Issuer, .. }));
    assert_eq!(err.exit_code(), 64);
    assert_eq!(dispatcher.report().await.paths(ResourceKind::Issuer, Outcome::Created), vec!["pki/root".to_string()]);
    assert_eq!(backend.issuer_names("pki").await, vec!["root".to_string()]);
}

#[tokio::test]
#[traced_test]
async fn test_failed_root_skips_its_chain() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_path("pki/root", InjectedFailure::Rejected("mount is read-only".to_string())).await;
    let (dispatcher, processors) = engine(&backend, 1);

    let err = dispatcher.dispatch(vec![root(), intermediate()]).await.unwrap_err();

    assert!(!err.is_forced());
    assert!(matches!(err.backend_source(), Some(BackendError::Rejected { .. })));
    assert!(!backend.calls().await.iter().any(|call| matches!(call, BackendCall::SignIntermediate { .. })));

    let graph = processors.issuers.graph();
    assert_eq!(graph.lock().await.node_state(&key("pki_int/int")), Some(NodeState::Failed));
    assert!(logs_contain("Root failed to materialize, skipping dependent"));
}

#[tokio::test]
async fn test_password_waits_for_its_policy() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, _processors) = engine(&backend, 1);
    let password: Resource = Password::simple("secret", "db", "password", "strong").into();
    let policy: Resource = PasswordPolicy::with_charset("strong", 24, "abcdef0123456789").into();

    let report = dispatcher.dispatch(vec![password, policy]).await.unwrap();

    assert_eq!(report.paths(ResourceKind::PasswordPolicy, Outcome::Created), vec!["strong".to_string()]);
    assert_eq!(report.paths(ResourceKind::Password, Outcome::Created), vec!["secret/db".to_string()]);

    let calls = backend.calls().await;
    let policy_written = calls.iter().position(|call| matches!(call, BackendCall::WritePasswordPolicy { .. })).unwrap();
    let generated = calls.iter().position(|call| matches!(call, BackendCall::GeneratePassword { .. })).unwrap();
    assert!(policy_written < generated);

    let (version, value) = backend.secret("secret", "db", "password").await.unwrap();
    assert_eq!(version, 1);
    assert_eq!(value.expose_secret().len(), 24);
    assert!(value.expose_secret().chars().all(|c| "abcdef0123456789".contains(c)));
}

#[tokio::test]
async fn test_unchanged_policy_still_releases_password() {
    let policy = PasswordPolicy::with_charset("strong", 16, "xyz");
    let hcl = policy.spec.policy_params.to_hcl();
    let backend = Arc::new(MemoryBackend::new().with_existing_policy("strong", &hcl));
    let (dispatcher, _processors) = engine(&backend, 1);

    let report = dispatcher
        .dispatch(vec![Password::simple("secret", "app", "token", "strong").into(), policy.into()])
        .await
        .unwrap();

    assert_eq!(report.paths(ResourceKind::PasswordPolicy, Outcome::Unchanged), vec!["strong".to_string()]);
    assert_eq!(report.paths(ResourceKind::Password, Outcome::Created), vec!["secret/app".to_string()]);
}

#[tokio::test]
async fn test_password_with_missing_policy_fails_as_forced() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, _processors) = engine(&backend, 1);

    let err = dispatcher
        .dispatch(vec![Password::simple("secret", "db", "password", "undeclared").into()])
        .await
        .unwrap_err();

    assert!(err.is_forced());
    assert!(matches!(err.backend_source(), Some(BackendError::PasswordPolicyNotFound { .. })));
    assert!(backend.secret("secret", "db", "password").await.is_none());
}

#[tokio::test]
async fn test_independent_failures_do_not_stop_siblings() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_path("broken", InjectedFailure::ConnectionFailed("connection reset".to_string())).await;
    let (dispatcher, _processors) = engine(&backend, 0);

    let err = dispatcher
        .dispatch(vec![
            PasswordPolicy::with_charset("broken", 12, "ab").into(),
            PasswordPolicy::with_charset("fine", 12, "ab").into(),
        ])
        .await
        .unwrap_err();

    assert_eq!(err.failures().len(), 1);
    assert_eq!(
        dispatcher.report().await.paths(ResourceKind::PasswordPolicy, Outcome::Created),
        vec!["fine".to_string()]
    );
}

#[tokio::test]
async fn test_max_dispatch_bounds_concurrent_backend_calls() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(20)));
    let (dispatcher, _processors) = engine(&backend, 2);
    let policies: Vec<Resource> =
        (0..8).map(|i| PasswordPolicy::with_charset(format!("policy-{}", i), 12, "ab").into()).collect();

    let report = dispatcher.dispatch(policies).await.unwrap();

    assert_eq!(report.count(Outcome::Created), 8);
    assert!(backend.peak_in_flight() <= 2, "peak was {}", backend.peak_in_flight());
    assert!(backend.peak_in_flight() >= 1);
}

#[tokio::test]
async fn test_policy_and_password_sharing_a_path_both_reconcile() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, processors) = engine(&backend, 1);
    let policy = PasswordPolicy::with_charset("secret/db", 20, "abcdef");
    let password = Password::simple("secret", "db", "password", "secret/db");
    assert_ne!(policy.node_key(), password.node_key());

    let report = dispatcher.dispatch(vec![password.into(), policy.into()]).await.unwrap();

    assert_eq!(
        report.paths(ResourceKind::PasswordPolicy, Outcome::Created),
        vec!["secret/db".to_string()]
    );
    assert_eq!(report.paths(ResourceKind::Password, Outcome::Created), vec!["secret/db".to_string()]);
    assert!(backend.secret("secret", "db", "password").await.is_some());

    let graph = processors.passwords.graph();
    let graph = graph.lock().await;
    assert_eq!(
        graph.edge_status(&key("sys/policies/password/secret/db"), &key("secret/db")),
        Some(EdgeStatus::Satisfied)
    );
}

fn pki_mount() -> Resource {
    SecretsEngine::mount("pki", "pki").into()
}

fn web_role() -> Resource {
    PkiRole::issuing_from("pki", "web", "root").into()
}

fn position(calls: &[BackendCall], is_call: impl Fn(&BackendCall) -> bool) -> usize {
    calls.iter().position(is_call).unwrap()
}

#[tokio::test]
async fn test_role_waits_for_its_mount_and_issuer_in_any_order() {
    let orders = [
        vec![web_role(), root(), pki_mount()],
        vec![web_role(), pki_mount(), root()],
        vec![pki_mount(), root(), web_role()],
    ];
    for resources in orders {
        let backend = Arc::new(MemoryBackend::new());
        let (dispatcher, processors) = engine(&backend, 1);

        let report = dispatcher.dispatch(resources).await.unwrap();

        assert_eq!(
            report.paths(ResourceKind::PkiRole, Outcome::Created),
            vec!["pki/roles/web".to_string()]
        );
        let calls = backend.calls().await;
        let role_written = position(&calls, |call| matches!(call, BackendCall::WritePkiRole { .. }));
        let mounted =
            position(&calls, |call| matches!(call, BackendCall::EnableSecretsEngine { .. }));
        let issued = position(&calls, |call| matches!(call, BackendCall::GenerateRootIssuer { .. }));
        assert!(mounted < role_written && issued < role_written);

        let graph = processors.pki_roles.graph();
        let graph = graph.lock().await;
        let role = key("pki/roles/web");
        assert_eq!(graph.edge_status(&key("sys/mounts/pki"), &role), Some(EdgeStatus::Satisfied));
        assert_eq!(graph.edge_status(&key("pki/root"), &role), Some(EdgeStatus::Satisfied));
        assert_eq!(graph.node_state(&role), Some(NodeState::Materialized));
    }
}

#[tokio::test]
async fn test_default_issuer_role_waits_only_for_mount() {
    let backend = Arc::new(MemoryBackend::new());
    let (dispatcher, processors) = engine(&backend, 1);
    let role: Resource = PkiRole::issuing_from("pki", "any", "default").into();

    let report = dispatcher.dispatch(vec![role, pki_mount()]).await.unwrap();

    assert_eq!(
        report.paths(ResourceKind::PkiRole, Outcome::Created),
        vec!["pki/roles/any".to_string()]
    );
    let graph = processors.pki_roles.graph();
    assert_eq!(graph.lock().await.roots_of(&key("pki/roles/any")), vec![key("sys/mounts/pki")]);
}

#[tokio::test]
#[traced_test]
async fn test_role_on_undeclared_mount_is_forced() {
    let backend = Arc::new(MemoryBackend::new().with_existing_mount("pki", "pki"));
    let (dispatcher, _processors) = engine(&backend, 1);

    let report = dispatcher.dispatch(vec![web_role(), root()]).await.unwrap();

    assert_eq!(
        report.paths(ResourceKind::PkiRole, Outcome::Created),
        vec!["pki/roles/web".to_string()]
    );
    assert!(backend.role("pki", "web").await.is_some());
    assert!(logs_contain("Root was never materialized, forcing dependent"));
}

#[tokio::test]
async fn test_role_on_forced_intermediate_runs_after_issuers_settle() {
    for fanout_limit in [None, Some(1)] {
        let backend = Arc::new(
            MemoryBackend::new()
                .with_existing_issuer("pki", "root")
                .with_existing_mount("pki_int", "pki"),
        );
        let config = DispatchConfig { max_dispatch: 2, fanout_limit };
        let (dispatcher, _processors) = Dispatcher::for_backend(backend.clone(), &config);
        let role: Resource = PkiRole::issuing_from("pki_int", "web", "int").into();

        let report = dispatcher.dispatch(vec![role, intermediate()]).await.unwrap();

        assert_eq!(
            report.paths(ResourceKind::Issuer, Outcome::Created),
            vec!["pki_int/int".to_string()]
        );
        assert_eq!(
            report.paths(ResourceKind::PkiRole, Outcome::Created),
            vec!["pki_int/roles/web".to_string()]
        );
        let calls = backend.calls().await;
        let named = position(&calls, |call| matches!(call, BackendCall::UpdateIssuer { .. }));
        let role_written = position(&calls, |call| matches!(call, BackendCall::WritePkiRole { .. }));
        assert!(named < role_written);
    }
}

#[tokio::test]
async fn test_conflicting_mount_is_reported_and_left_in_place() {
    let backend = Arc::new(MemoryBackend::new().with_existing_mount("pki", "transit"));
    let (dispatcher, _processors) = engine(&backend, 1);
    let role: Resource = PkiRole::issuing_from("pki", "web", "default").into();

    let err = dispatcher.dispatch(vec![pki_mount(), role]).await.unwrap_err();

    assert_eq!(err.failures().len(), 1);
    assert!(matches!(
        err.backend_source(),
        Some(BackendError::MountPathInUse { existing: Some(existing), .. }) if existing == "transit"
    ));
    assert_eq!(backend.mount("pki").await.unwrap().engine_type, "transit");

    let report = dispatcher.report().await;
    assert!(report.paths(ResourceKind::SecretsEngine, Outcome::Created).is_empty());
    // The mount path exists, so the role is still forced onto it.
    assert_eq!(
        report.paths(ResourceKind::PkiRole, Outcome::Created),
        vec!["pki/roles/web".to_string()]
    );
}
