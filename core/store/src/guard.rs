//! Permission enforcement for every mutation of a guarded record.
//!
//! | level     | read     | mutate / delete           |
//! |-----------|----------|---------------------------|
//! | open      | visible  | runs immediately          |
//! | guarded   | visible  | runs after confirmation   |
//! | read_only | visible  | PermissionDenied          |
//! | locked    | hidden   | PermissionDenied          |
//!
//! The `permission_bypass` setting skips the whole matrix. Bypassed runs are
//! logged under the `memory_vault::bypass` target and reported as
//! [`GuardPath::Bypassed`] in the outcome.

use async_trait::async_trait;
use memory_vault_schemas::{PermissionLevel, DEFAULT_PERMISSION};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{EntityKind, Result, StoreError};
use crate::settings::{SettingsReader, SETTING_DEFAULT_PERMISSION, SETTING_PERMISSION_BYPASS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    Update,
    Delete,
    Archive,
    SetPermission,
}

impl GuardAction {
    /// Noun used in confirmation prompts and rejection errors
    pub fn verb(&self) -> &'static str {
        match self {
            GuardAction::Update => "update",
            GuardAction::Delete => "delete",
            GuardAction::Archive => "archive",
            GuardAction::SetPermission => "permission change",
        }
    }

    fn participle(&self) -> &'static str {
        match self {
            GuardAction::Update => "updated",
            GuardAction::Delete => "deleted",
            GuardAction::Archive => "archived",
            GuardAction::SetPermission => "re-permissioned",
        }
    }
}

/// What the guard needs to know about a record. Content never enters here.
#[derive(Debug, Clone)]
pub struct GuardedEntity {
    pub id: String,
    pub display_name: String,
    pub kind: EntityKind,
    pub permission: PermissionLevel,
}

impl GuardedEntity {
    pub fn describe(&self) -> String {
        format!("{} '{}' ({})", self.kind, self.display_name, self.id)
    }

    /// Fails for records hidden from every read
    pub fn ensure_visible(&self) -> Result<()> {
        if self.permission.is_visible() {
            Ok(())
        } else {
            Err(StoreError::PermissionDenied {
                kind: self.kind,
                id: self.id.clone(),
                level: self.permission,
                action: "read",
            })
        }
    }
}

/// Records the guard can describe
pub trait Guardable {
    fn guarded_entity(&self) -> GuardedEntity;
}

/// How a guarded operation came to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPath {
    /// Open record, no confirmation needed
    Direct,
    /// Guarded record, approved by the confirmer
    Confirmed,
    /// Matrix skipped by the `permission_bypass` setting
    Bypassed,
}

#[derive(Debug)]
pub struct Guarded<T> {
    pub value: T,
    pub path: GuardPath,
}

impl<T> Guarded<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
        Guarded {
            value: f(self.value),
            path: self.path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// External approval channel for guarded mutations. A rejection and a
/// failed channel are the same thing to the guard.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn ask(&self, action: GuardAction, target: &str) -> std::result::Result<(), Rejection>;
}

/// Confirmer with a fixed answer that counts how often it was asked
#[derive(Debug)]
pub struct AutoConfirm {
    approve: bool,
    asked: AtomicUsize,
}

impl AutoConfirm {
    pub fn approve() -> Self {
        Self {
            approve: true,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn reject() -> Self {
        Self {
            approve: false,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn ask(&self, action: GuardAction, target: &str) -> std::result::Result<(), Rejection> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        if self.approve {
            Ok(())
        } else {
            Err(Rejection::new(format!("{} of {} declined", action.verb(), target)))
        }
    }
}

#[derive(Clone)]
pub struct PermissionGuard {
    confirmer: Arc<dyn Confirmer>,
}

impl PermissionGuard {
    pub fn new(confirmer: Arc<dyn Confirmer>) -> Self {
        Self { confirmer }
    }

    /// Run `operation` if the entity's permission level allows `action`.
    ///
    /// `operation` never runs for read_only or locked records, or when the
    /// confirmer rejects.
    ///
    /// Errors raised by `operation` are not all wrapped. The expected
    /// outcomes (`NotFound`, `PermissionDenied`, `ConfirmationRejected`,
    /// `Validation`, see [`StoreError::is_expected`]) are returned unchanged
    /// so callers can match on them. Any other failure, such as a database
    /// or serialization error, becomes `StoreError::Operation` naming the
    /// entity and action, with the original error as its `source`.
    pub async fn guarded_action<T, S, F>(
        &self,
        settings: &S,
        entity: &GuardedEntity,
        action: GuardAction,
        operation: F,
    ) -> Result<Guarded<T>>
    where
        S: SettingsReader + ?Sized,
        F: FnOnce() -> Result<T>,
    {
        if settings.flag_enabled(SETTING_PERMISSION_BYPASS)? {
            warn!(
                target: "memory_vault::bypass",
                kind = %entity.kind,
                id = %entity.id,
                level = %entity.permission,
                action = action.verb(),
                "Permission bypass active, running without checks"
            );
            let value = run(entity, action, operation)?;
            return Ok(Guarded {
                value,
                path: GuardPath::Bypassed,
            });
        }

        match entity.permission {
            PermissionLevel::Locked | PermissionLevel::ReadOnly => {
                debug!(
                    "Blocked {} of {} {} ({})",
                    action.verb(),
                    entity.kind,
                    entity.id,
                    entity.permission
                );
                Err(StoreError::PermissionDenied {
                    kind: entity.kind,
                    id: entity.id.clone(),
                    level: entity.permission,
                    action: action.participle(),
                })
            }
            PermissionLevel::Guarded => {
                if let Err(rejection) = self.confirmer.ask(action, &entity.describe()).await {
                    info!(
                        target: "memory_vault::guard",
                        "{} of {} {} rejected: {}",
                        action.verb(),
                        entity.kind,
                        entity.id,
                        rejection.reason
                    );
                    return Err(StoreError::ConfirmationRejected {
                        kind: entity.kind,
                        id: entity.id.clone(),
                        action: action.verb(),
                        reason: rejection.reason,
                    });
                }

                info!(
                    target: "memory_vault::guard",
                    "{} of {} {} confirmed",
                    action.verb(),
                    entity.kind,
                    entity.id
                );
                let value = run(entity, action, operation)?;
                Ok(Guarded {
                    value,
                    path: GuardPath::Confirmed,
                })
            }
            PermissionLevel::Open => {
                let value = run(entity, action, operation)?;
                Ok(Guarded {
                    value,
                    path: GuardPath::Direct,
                })
            }
        }
    }
}

fn run<T>(
    entity: &GuardedEntity,
    action: GuardAction,
    operation: impl FnOnce() -> Result<T>,
) -> Result<T> {
    operation().map_err(|err| {
        if err.is_expected() {
            err
        } else {
            StoreError::Operation {
                kind: entity.kind,
                id: entity.id.clone(),
                action: action.verb(),
                source: Box::new(err),
            }
        }
    })
}

/// Permission for a new record: explicit argument, then the container's
/// default, then the `default_permission` setting, then
/// [`DEFAULT_PERMISSION`]. The first present value wins.
pub fn resolve_permission<S: SettingsReader + ?Sized>(
    settings: &S,
    explicit: Option<PermissionLevel>,
    container_default: Option<PermissionLevel>,
) -> Result<PermissionLevel> {
    if let Some(level) = explicit {
        return Ok(level);
    }

    if let Some(level) = container_default {
        return Ok(level);
    }

    if let Some(raw) = settings.get_setting(SETTING_DEFAULT_PERMISSION)? {
        match raw.parse::<PermissionLevel>() {
            Ok(level) => return Ok(level),
            Err(e) => warn!("Ignoring {} setting: {}", SETTING_DEFAULT_PERMISSION, e),
        }
    }

    Ok(DEFAULT_PERMISSION)
}
