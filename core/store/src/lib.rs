pub mod config;
pub mod containers;
pub mod context;
pub mod database;
pub mod error;
pub mod guard;
pub mod knowledge;
pub mod migration;
pub mod settings;
pub mod tasks;

pub use config::StoreConfig;
pub use containers::{AdminOps, ContainerPatch, NewContainer};
pub use context::{GlobalSummary, IdentitySummary, Scope, ScopeSummary};
pub use database::{fold_case, Database};
pub use error::{EntityKind, Result, StoreError};
pub use guard::{
    resolve_permission, AutoConfirm, Confirmer, GuardAction, GuardPath, Guardable, Guarded,
    GuardedEntity, PermissionGuard, Rejection,
};
pub use knowledge::{KnowledgePatch, NewKnowledge, RelatedKnowledge, ScopeTarget};
pub use migration::{MigrationStats, LEGACY_PREFERENCES_KEY};
pub use settings::{
    SettingsReader, SETTING_DEFAULT_PERMISSION, SETTING_PERMISSION_BYPASS, SETTING_SEARCH_LIMIT,
};
pub use tasks::{NewWorkItem, WorkItemCounts, WorkItemFilter, WorkItemPatch};
