//! Personal views of never-used accounts, and how opening content fills them.

use crate::fixture::{Fixture, FixtureContext, FixtureTest, TestFailure, ensure, ensure_eq};
use async_trait::async_trait;
use std::sync::Arc;
use vault_harness_core::{PersonalView, RoleSpec};

/// Users that have never logged in, checked view by view.
#[derive(Debug, Default)]
pub struct PersonalViewsFixture;

impl PersonalViewsFixture {
    pub fn new() -> Self {
        Self
    }
}

impl Fixture for PersonalViewsFixture {
    fn id(&self) -> &str {
        "personal-views"
    }

    fn description(&self) -> &str {
        "Personal views start empty and track what each user opens"
    }

    fn role_specs(&self) -> Vec<RoleSpec> {
        let mut specs = vec![RoleSpec::user()];
        specs.extend(RoleSpec::generic_users(2));
        specs
    }

    fn tests(&self) -> Vec<Box<dyn FixtureTest>> {
        vec![
            Box::new(FreshLoginShowsEmptyViews),
            Box::new(RecentTracksOpenedObject),
            Box::new(PassKeepsSessionAtLanding),
            Box::new(OtherUserRecentStaysEmpty),
        ]
    }
}

struct FreshLoginShowsEmptyViews;

#[async_trait]
impl FixtureTest for FreshLoginShowsEmptyViews {
    fn name(&self) -> &str {
        "fresh_login_shows_empty_views"
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        let credential = ctx.credential("user-1")?;
        let mut home = ctx.session.fresh_login_and_start(&credential).await?;

        for view in PersonalView::all() {
            let items = home.open_view(*view).await?;
            ensure_eq(&format!("{view} items"), Vec::<String>::new(), items)?;
        }
        Ok(())
    }
}

struct RecentTracksOpenedObject;

impl RecentTracksOpenedObject {
    const RELATIVE_PATH: &'static str = "contracts/msa.docx";
    const TITLE: &'static str = "msa.docx";
}

#[async_trait]
impl FixtureTest for RecentTracksOpenedObject {
    fn name(&self) -> &str {
        "recent_tracks_opened_object"
    }

    fn order(&self) -> i32 {
        1
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        let credential = ctx.credential("user-1")?;
        let label = ctx.connector_label("share");
        let provisioner = Arc::clone(&ctx.provisioner);
        let env = Arc::clone(&ctx.environment);

        provisioner.configure_external_connector(&env, &label).await?;
        let object = provisioner
            .promote_object(&env, &format!("{label}/{}", Self::RELATIVE_PATH), None)
            .await?;

        let recent = async {
            let mut home = ctx.session.start_at_home_page(Some(&credential)).await?;
            home.open_object(object.object_id).await?;
            let recent = home.open_view(PersonalView::Recent).await?;
            Ok::<_, TestFailure>(recent)
        }
        .await;

        // The external repository outlives the environment.
        provisioner.clear_external_repository(&label).await;

        ensure_eq("recent items", vec![Self::TITLE.to_string()], recent?)
    }
}

struct PassKeepsSessionAtLanding;

#[async_trait]
impl FixtureTest for PassKeepsSessionAtLanding {
    fn name(&self) -> &str {
        "pass_keeps_session_at_landing"
    }

    fn order(&self) -> i32 {
        2
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        let credential = ctx.credential("user-1")?;
        let live_before = ctx.session.session_id();
        let created_before = ctx.session.stats().sessions_created;

        let mut home = ctx.session.start_at_home_page(Some(&credential)).await?;
        ensure(home.is_at_landing().await?, "at landing", "landing view", "elsewhere")?;
        let bound = home.credential().map(|c| c.username.clone());
        ensure_eq("bound user", Some(credential.username.clone()), bound)?;

        if live_before.is_some() {
            ensure_eq(
                "sessions created",
                created_before,
                ctx.session.stats().sessions_created,
            )?;
        }
        Ok(())
    }
}

struct OtherUserRecentStaysEmpty;

#[async_trait]
impl FixtureTest for OtherUserRecentStaysEmpty {
    fn name(&self) -> &str {
        "other_user_recent_stays_empty"
    }

    fn order(&self) -> i32 {
        3
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        let credential = ctx.credential("user-2")?;
        let mut home = ctx.session.start_at_home_page(Some(&credential)).await?;
        let recent = home.open_view(PersonalView::Recent).await?;
        ensure_eq("recent items", Vec::<String>::new(), recent)
    }
}
