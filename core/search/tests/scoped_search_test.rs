use anyhow::Result;
use memory_vault_schemas::{KnowledgeItem, KnowledgeType, PermissionLevel};
use memory_vault_search::{render_results, ScopedSearch, SearchResults, GLOBAL_LABEL};
use memory_vault_store::{
    AutoConfirm, Database, NewContainer, NewKnowledge, PermissionGuard, Scope, ScopeTarget,
    SETTING_SEARCH_LIMIT,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    db: Database,
    guard: PermissionGuard,
}

impl Fixture {
    fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let db = Database::new(dir.path().join("vault.db"))?;
        Ok(Self {
            _dir: dir,
            db,
            guard: PermissionGuard::new(Arc::new(AutoConfirm::approve())),
        })
    }

    fn container(&self, name: &str) -> Result<()> {
        self.db.create_container(&NewContainer {
            name: name.to_string(),
            ..NewContainer::default()
        })?;
        Ok(())
    }

    async fn save(&self, target: ScopeTarget, title: &str, content: &str) -> Result<KnowledgeItem> {
        self.save_with(target, title, content, |_| {}).await
    }

    async fn save_with(
        &self,
        target: ScopeTarget,
        title: &str,
        content: &str,
        adjust: impl FnOnce(&mut NewKnowledge),
    ) -> Result<KnowledgeItem> {
        let mut new = NewKnowledge::new(KnowledgeType::Insight, title, content);
        new.target = target;
        adjust(&mut new);
        Ok(self
            .db
            .save_knowledge(&self.guard, &Scope::global(), &new)
            .await?
            .value)
    }
}

fn named(name: &str) -> ScopeTarget {
    ScopeTarget::Named(name.to_string())
}

#[tokio::test]
async fn test_scoped_search_splits_alpha_and_global() -> Result<()> {
    let fx = Fixture::new()?;
    fx.container("alpha")?;
    fx.save(named("alpha"), "Request timeout tuning", "Raise to 30s").await?;
    fx.save(ScopeTarget::Global, "Global timeout default", "Keep at 10s").await?;
    fx.save(named("alpha"), "Unrelated", "nothing to see").await?;

    fx.db.enter_scope("alpha")?;
    let scope = fx.db.load_scope()?;
    let results = ScopedSearch::new(&fx.db).find(&scope, Some("timeout"), None)?;

    match &results {
        SearchResults::Scoped {
            scope_name,
            in_scope,
            fallback,
        } => {
            assert_eq!(scope_name, "alpha");
            assert_eq!(in_scope.len(), 1);
            assert_eq!(in_scope[0].title, "Request timeout tuning");
            assert_eq!(fallback.len(), 1);
            assert_eq!(fallback[0].label(), GLOBAL_LABEL);
            assert_eq!(fallback[0].hits.len(), 1);
            assert_eq!(fallback[0].hits[0].title, "Global timeout default");
        }
        other => panic!("expected scoped results, got {other:?}"),
    }

    let text = render_results(&results);
    assert!(text.contains("## alpha (1)"));
    assert!(text.contains("### Global (1)"));
    Ok(())
}

#[tokio::test]
async fn test_fallback_groups_other_containers_before_global() -> Result<()> {
    let fx = Fixture::new()?;
    for name in ["alpha", "zeta", "beta"] {
        fx.container(name)?;
    }
    fx.save(ScopeTarget::Global, "cache note global", "x").await?;
    fx.save(named("zeta"), "cache note zeta", "x").await?;
    fx.save(named("beta"), "cache note beta", "x").await?;

    fx.db.enter_scope("alpha")?;
    let results = ScopedSearch::new(&fx.db).find(&fx.db.load_scope()?, Some("cache"), None)?;

    let SearchResults::Scoped {
        in_scope, fallback, ..
    } = results
    else {
        panic!("expected scoped results");
    };
    assert!(in_scope.is_empty());
    let labels: Vec<&str> = fallback.iter().map(|g| g.label()).collect();
    assert_eq!(labels, vec!["beta", "zeta", GLOBAL_LABEL]);
    Ok(())
}

#[tokio::test]
async fn test_locked_items_never_surface() -> Result<()> {
    let fx = Fixture::new()?;
    fx.container("alpha")?;
    fx.save_with(named("alpha"), "secret timeout", "hidden", |n| {
        n.permission = Some(PermissionLevel::Locked)
    })
    .await?;
    fx.save_with(ScopeTarget::Global, "global secret timeout", "hidden", |n| {
        n.permission = Some(PermissionLevel::Locked)
    })
    .await?;
    fx.save(ScopeTarget::Global, "visible timeout", "shown").await?;

    let search = ScopedSearch::new(&fx.db);
    let global = search.find(&Scope::global(), Some("timeout"), None)?;
    assert_eq!(global.total(), 1);

    let everything = search.find(&Scope::global(), None, None)?;
    assert_eq!(everything.total(), 1);

    fx.db.enter_scope("alpha")?;
    let scoped = search.find(&fx.db.load_scope()?, Some("secret"), None)?;
    assert!(scoped.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_wildcards_match_literally() -> Result<()> {
    let fx = Fixture::new()?;
    fx.save(ScopeTarget::Global, "Coverage at 100%", "numbers").await?;
    fx.save(ScopeTarget::Global, "Coverage at 1000", "numbers").await?;
    fx.save(ScopeTarget::Global, "snake_case names", "style").await?;
    fx.save(ScopeTarget::Global, "snakeXcase names", "style").await?;

    let search = ScopedSearch::new(&fx.db);
    assert_eq!(search.find(&Scope::global(), Some("100%"), None)?.total(), 1);
    assert_eq!(search.find(&Scope::global(), Some("snake_case"), None)?.total(), 1);
    assert_eq!(search.find(&Scope::global(), Some("%"), None)?.total(), 1);
    Ok(())
}

#[tokio::test]
async fn test_matches_tags_and_category_path_case_insensitively() -> Result<()> {
    let fx = Fixture::new()?;
    fx.save_with(ScopeTarget::Global, "Tagged", "body", |n| {
        n.tags = vec!["Observability".into()]
    })
    .await?;
    fx.save_with(ScopeTarget::Global, "Filed", "body", |n| {
        n.category_path = vec!["Backend".into(), "Databases".into()]
    })
    .await?;

    let search = ScopedSearch::new(&fx.db);
    let SearchResults::Global { hits } = search.find(&Scope::global(), Some("OBSERV"), None)? else {
        panic!("expected global results");
    };
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Tagged");

    let SearchResults::Global { hits } = search.find(&Scope::global(), Some("databases"), None)?
    else {
        panic!("expected global results");
    };
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Filed");
    Ok(())
}

#[tokio::test]
async fn test_kind_filter_and_limit() -> Result<()> {
    let fx = Fixture::new()?;
    for i in 0..5 {
        fx.save(ScopeTarget::Global, &format!("insight {i}"), "body").await?;
    }
    fx.save_with(ScopeTarget::Global, "a decision", "body", |n| {
        n.kind = KnowledgeType::Decision
    })
    .await?;

    let search = ScopedSearch::new(&fx.db);
    let decisions = search.find(&Scope::global(), None, Some(KnowledgeType::Decision))?;
    assert_eq!(decisions.total(), 1);

    fx.db.set_setting(SETTING_SEARCH_LIMIT, "3")?;
    let SearchResults::Global { hits } = search.find(&Scope::global(), None, None)? else {
        panic!("expected global results");
    };
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].title, "a decision");
    Ok(())
}

#[tokio::test]
async fn test_results_serialize_with_mode_tag() -> Result<()> {
    let fx = Fixture::new()?;
    fx.save(ScopeTarget::Global, "serialized", "body").await?;

    let results = ScopedSearch::new(&fx.db).find(&Scope::global(), None, None)?;
    let json = serde_json::to_value(&results)?;
    assert_eq!(json["mode"], "global");
    assert_eq!(json["hits"][0]["title"], "serialized");
    assert!(json["hits"][0].get("content").is_none());
    Ok(())
}

#[tokio::test]
async fn test_non_ascii_text_matches_in_any_case() -> Result<()> {
    let fx = Fixture::new()?;
    fx.save(ScopeTarget::Global, "Über caching", "Ärger mit Caches").await?;

    let search = ScopedSearch::new(&fx.db);
    for query in ["Über", "über", "ÜBER", "Ärger", "ärger"] {
        assert_eq!(
            search.find(&Scope::global(), Some(query), None)?.total(),
            1,
            "query {query:?}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_category_path_matches_single_segments_only() -> Result<()> {
    let fx = Fixture::new()?;
    fx.save_with(ScopeTarget::Global, "Filed", "plain body", |n| {
        n.category_path = vec!["Backend".into(), "Databases".into()]
    })
    .await?;

    let search = ScopedSearch::new(&fx.db);
    for query in ["[", "\"", "\",\"", "backend\",\"databases"] {
        assert!(
            search.find(&Scope::global(), Some(query), None)?.is_empty(),
            "query {query:?} matched"
        );
    }
    assert_eq!(search.find(&Scope::global(), Some("kend"), None)?.total(), 1);
    assert_eq!(search.find(&Scope::global(), Some("DATABASES"), None)?.total(), 1);
    Ok(())
}
