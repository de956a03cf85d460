use std::sync::Arc;
use std::time::Duration;
use vault_harness_core::testing::{FakeDeployment, FakeLauncher};
use vault_harness_core::{
    BackendKind, CapacityGate, DatasetTemplate, PersonalView, ResourceProvisioner, RoleSpec,
    SessionManager, SessionState, SiteMap, TestOutcome,
};

fn provisioner(deployment: &FakeDeployment, capacity: usize) -> Arc<ResourceProvisioner> {
    Arc::new(ResourceProvisioner::new(
        Arc::new(deployment.clone()),
        BackendKind::Embedded,
        CapacityGate::new(capacity),
    ))
}

#[tokio::test]
async fn test_fixture_lifecycle_end_to_end() {
    let deployment = FakeDeployment::new();
    let launcher = Arc::new(FakeLauncher::new(deployment.clone()));
    let provisioner = provisioner(&deployment, 2);

    let mut roles = vec![RoleSpec::user()];
    roles.extend(RoleSpec::generic_users(1));
    let env = Arc::new(
        provisioner
            .provision(&DatasetTemplate::default(), &roles)
            .await
            .unwrap(),
    );
    let mut session = SessionManager::new(
        launcher.clone(),
        Arc::clone(&env),
        SiteMap::new(FakeDeployment::BASE_URL),
    );

    // A passing test keeps the session and lands back home.
    session.start_at_home_page(None).await.unwrap();
    let first = session.session_id();
    session.finalize_based_on_outcome(TestOutcome::Pass).await;
    assert_eq!(session.session_id(), first);
    assert_eq!(session.state(), SessionState::AtHome);
    assert_eq!(
        launcher.last_url().unwrap(),
        SiteMap::new(FakeDeployment::BASE_URL).home_url(env.name())
    );

    // A failing test destroys it; the next one starts fresh.
    session.finalize_based_on_outcome(TestOutcome::Fail).await;
    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(launcher.quits(), 1);

    let fresh = env.credential("user-1").unwrap().clone();
    let mut home = session.fresh_login_and_start(&fresh).await.unwrap();
    for view in PersonalView::all() {
        assert!(home.open_view(*view).await.unwrap().is_empty());
    }
    assert_ne!(session.session_id(), first);

    session.ensure_quit().await;
    provisioner.teardown(&env).await;
    provisioner.teardown(&env).await;
    assert_eq!(deployment.destroy_calls(), 1);
    assert!(!deployment.environment_exists(env.name()));
}

#[tokio::test]
async fn test_capacity_bounds_concurrent_provisioning() {
    let deployment = FakeDeployment::new().with_creation_delay(Duration::from_millis(30));
    let provisioner = provisioner(&deployment, 3);
    let template = DatasetTemplate::default();
    let roles = [RoleSpec::user()];

    let calls = (0..4).map(|_| provisioner.provision(&template, &roles));
    let envs: Vec<_> = futures::future::join_all(calls)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(envs.len(), 4);
    assert_eq!(deployment.max_concurrent_creations(), 3);
    for env in &envs {
        provisioner.teardown(env).await;
    }
    assert_eq!(deployment.live_environment_count(), 0);
}
