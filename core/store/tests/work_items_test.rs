use anyhow::Result;
use memory_vault_store::{Database, NewContainer, NewWorkItem, WorkItemFilter};
use tempfile::TempDir;

#[test]
fn test_child_resolves_parent_container_from_active_scope() -> Result<()> {
    let dir = TempDir::new()?;
    let db = Database::new(dir.path().join("vault.db"))?;

    let beta = db.create_container(&NewContainer {
        name: "beta".into(),
        ..NewContainer::default()
    })?;
    db.create_container(&NewContainer {
        name: "elsewhere".into(),
        ..NewContainer::default()
    })?;

    db.enter_scope("beta")?;
    let a = db.create_work_item(&db.load_scope()?, &NewWorkItem::new("A"))?;

    db.enter_scope("elsewhere")?;
    let b = db.create_work_item(&db.load_scope()?, &NewWorkItem::child_of(&a.id, "B"))?;

    assert_eq!(a.container_id, Some(beta.id.clone()));
    assert_eq!(b.container_id, Some(beta.id));
    Ok(())
}

#[test]
fn test_deleting_any_chain_leaves_nothing_reachable() -> Result<()> {
    let dir = TempDir::new()?;
    let db = Database::new(dir.path().join("vault.db"))?;
    let scope = db.load_scope()?;

    for depth in [0usize, 1, 5, 200] {
        let root = db.create_work_item(&scope, &NewWorkItem::new(format!("Root {depth}")))?;
        let mut ids = vec![root.id.clone()];
        let mut parent = root.id.clone();
        for level in 0..depth {
            parent = db
                .create_work_item(&scope, &NewWorkItem::child_of(&parent, format!("L{level}")))?
                .id;
            ids.push(parent.clone());
        }

        assert_eq!(db.delete_work_item(&root.id)?, depth + 1);
        for id in &ids {
            assert_eq!(db.get_work_item(id).unwrap_err().code(), "NOT_FOUND");
        }
        assert!(db.list_work_items(&WorkItemFilter::Children(parent))?.is_empty());
    }

    assert!(db.list_work_items(&WorkItemFilter::TopLevel)?.is_empty());
    Ok(())
}
