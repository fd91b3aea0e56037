use crate::domain::constants::HardLimits;
use crate::domain::errors::SettingsError;
use crate::domain::events::ControlEvent;
use crate::domain::repositories::{SettingsRepository, UserRepository};
use crate::domain::settings::{ChangeType, Settings, SettingsAudit, SettingsPatch};
use crate::domain::types::{ExecutionMode, TradingMode, UserId};
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Writers lose the CAS on a stale read and retry this many times before the
/// conflict surfaces.
const CAS_RETRIES: u32 = 3;

/// Hook the execution engine registers so that open orders are cancelled
/// *before* a mode flip becomes observable to new `execute` calls.
#[async_trait]
pub trait ModeSwitchGuard: Send + Sync {
    async fn before_mode_change(&self, user_id: Option<UserId>) -> anyhow::Result<()>;
}

/// Health gate consulted on guide -> autonomous. Wired from the coordinator;
/// absent in unit tests, which means the transition is allowed.
#[async_trait]
pub trait TransitionPolicy: Send + Sync {
    /// Err carries the human-readable rejection reason.
    async fn check_enter_autonomous(&self, user_id: Option<UserId>) -> Result<(), String>;
}

/// The versioned settings singleton. Readers are lock-free (repository MVCC);
/// writers serialize on `write_lock` and commit through a version CAS.
pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
    users: Arc<dyn UserRepository>,
    hard: &'static HardLimits,
    events: EventBus,
    mode_guard: RwLock<Option<Arc<dyn ModeSwitchGuard>>>,
    transition_policy: RwLock<Option<Arc<dyn TransitionPolicy>>>,
    write_lock: Mutex<()>,
}

impl SettingsService {
    pub fn new(
        repo: Arc<dyn SettingsRepository>,
        users: Arc<dyn UserRepository>,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            users,
            hard: HardLimits::get(),
            events,
            mode_guard: RwLock::new(None),
            transition_policy: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Two-phase wiring: the engine depends on settings, so it registers its
    /// cancel hook after construction.
    pub async fn register_mode_guard(&self, guard: Arc<dyn ModeSwitchGuard>) {
        *self.mode_guard.write().await = Some(guard);
    }

    pub async fn register_transition_policy(&self, policy: Arc<dyn TransitionPolicy>) {
        *self.transition_policy.write().await = Some(policy);
    }

    /// Always returns a record; bootstraps defaults in one transaction when
    /// none exists yet.
    pub async fn get(&self) -> Result<Settings, SettingsError> {
        if let Some(settings) = self.repo.load().await? {
            return Ok(settings);
        }

        let defaults = Settings::defaults(self.hard);
        let audit = SettingsAudit {
            id: Uuid::new_v4(),
            version: defaults.version,
            changed_by: None,
            changed_at: Utc::now(),
            change_type: ChangeType::Bootstrap,
            old_values: serde_json::json!({}),
            new_values: serde_json::json!({ "bootstrap": true }),
            reason: "default settings created".to_string(),
        };

        match self.repo.insert_default(&defaults, &audit).await {
            Ok(()) => {
                info!("SettingsService: Bootstrapped default settings (v1)");
                Ok(defaults)
            }
            // Lost the bootstrap race; the winner's record is authoritative.
            Err(_) => Ok(self
                .repo
                .load()
                .await?
                .ok_or_else(|| anyhow::anyhow!("settings vanished after bootstrap race"))?),
        }
    }

    /// Applies a patch transactionally: overlay, validate against hard limits
    /// and cross-field consistency, bump version, emit exactly one audit row.
    /// An identity patch is a data-level no-op.
    pub async fn update(
        &self,
        patch: &SettingsPatch,
        changed_by: Option<UserId>,
        reason: &str,
    ) -> Result<Settings, SettingsError> {
        let _writer = self.write_lock.lock().await;

        for attempt in 0..CAS_RETRIES {
            let current = self.get().await?;
            let (mut next, old_values, new_values) = current.apply_patch(patch);

            if old_values.as_object().is_some_and(|m| m.is_empty()) {
                return Ok(current);
            }

            next.validate(self.hard)
                .map_err(|errors| SettingsError::ValidationFailed(errors.join("; ")))?;

            self.check_mode_transition(&current, &next, changed_by)
                .await?;

            next.version = current.version + 1;
            next.updated_at = Utc::now();
            next.updated_by = changed_by;

            let change_type = if patch.touches_mode() {
                ChangeType::ModeChange
            } else {
                ChangeType::Update
            };
            let audit = SettingsAudit {
                id: Uuid::new_v4(),
                version: next.version,
                changed_by,
                changed_at: next.updated_at,
                change_type,
                old_values,
                new_values,
                reason: reason.to_string(),
            };

            // Open orders are cancelled before the new mode can be observed
            // by any execute call racing this update.
            if patch.touches_mode() && current.cancel_orders_on_mode_switch {
                if let Some(guard) = self.mode_guard.read().await.as_ref() {
                    guard.before_mode_change(changed_by).await?;
                }
            }

            if self
                .repo
                .compare_and_update(current.version, &next, &audit)
                .await?
            {
                info!(
                    "SettingsService: Settings updated to v{} ({:?})",
                    next.version, change_type
                );
                self.publish_changes(&current, &next, changed_by);
                return Ok(next);
            }

            warn!(
                "SettingsService: Version conflict on v{} (attempt {})",
                current.version,
                attempt + 1
            );
        }

        Err(SettingsError::VersionConflict)
    }

    /// Mode-only update with the transition guards of the mode machine.
    pub async fn set_mode(
        &self,
        new_mode: TradingMode,
        changed_by: Option<UserId>,
        reason: &str,
    ) -> Result<Settings, SettingsError> {
        let patch = SettingsPatch {
            mode: Some(new_mode),
            ..Default::default()
        };
        self.update(&patch, changed_by, reason).await
    }

    /// Execution-mode update. Switching to `live` requires a verified
    /// password, an explicit confirmation, and a non-empty reason.
    pub async fn set_execution_mode(
        &self,
        new_mode: ExecutionMode,
        changed_by: Option<UserId>,
        password: Option<&str>,
        confirmed: bool,
        reason: &str,
    ) -> Result<Settings, SettingsError> {
        if new_mode == ExecutionMode::Live {
            if reason.trim().is_empty() {
                return Err(SettingsError::ModeBlocked {
                    reason: "reason_required".to_string(),
                });
            }
            if !confirmed {
                return Err(SettingsError::ModeBlocked {
                    reason: "exec_live_unconfirmed".to_string(),
                });
            }
            let user_id = changed_by.ok_or_else(|| SettingsError::ModeBlocked {
                reason: "bad_password".to_string(),
            })?;
            let user = self
                .users
                .by_id(user_id)
                .await?
                .ok_or_else(|| SettingsError::ModeBlocked {
                    reason: "bad_password".to_string(),
                })?;
            let password = password.unwrap_or_default();
            let verified = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
            if !verified {
                warn!(
                    "SettingsService: Rejected live-mode switch for {} (bad password)",
                    user.email
                );
                return Err(SettingsError::ModeBlocked {
                    reason: "bad_password".to_string(),
                });
            }
        }

        let patch = SettingsPatch {
            exec_mode: Some(new_mode),
            ..Default::default()
        };
        self.update(&patch, changed_by, reason).await
    }

    pub async fn audit(&self, limit: u32) -> Result<Vec<SettingsAudit>, SettingsError> {
        Ok(self.repo.audit_log(limit).await?)
    }

    async fn check_mode_transition(
        &self,
        current: &Settings,
        next: &Settings,
        changed_by: Option<UserId>,
    ) -> Result<(), SettingsError> {
        // autonomous -> guide is always allowed; guide -> autonomous goes
        // through the health gate.
        if current.mode == TradingMode::Guide && next.mode == TradingMode::Autonomous {
            if let Some(policy) = self.transition_policy.read().await.as_ref() {
                policy
                    .check_enter_autonomous(changed_by)
                    .await
                    .map_err(|reason| SettingsError::ModeBlocked { reason })?;
            }
        }
        Ok(())
    }

    fn publish_changes(&self, old: &Settings, new: &Settings, changed_by: Option<UserId>) {
        if old.mode != new.mode {
            self.events.publish(ControlEvent::ModeChanged {
                user_id: changed_by,
                old_mode: old.mode,
                new_mode: new.mode,
            });
        }
        if old.exec_mode != new.exec_mode {
            self.events.publish(ControlEvent::ExecutionModeChanged {
                user_id: changed_by,
                old_mode: old.exec_mode,
                new_mode: new.exec_mode,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::in_memory::{
        InMemorySettingsRepository, InMemoryUserRepository,
    };
    use crate::domain::user::UserAccount;
    use rust_decimal_macros::dec;

    fn service() -> SettingsService {
        SettingsService::new(
            Arc::new(InMemorySettingsRepository::new()),
            Arc::new(InMemoryUserRepository::new()),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn test_get_bootstraps_defaults_with_audit() {
        let svc = service();
        let settings = svc.get().await.unwrap();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.mode, TradingMode::Guide);
        assert_eq!(settings.exec_mode, ExecutionMode::Simulation);

        let audit = svc.audit(10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].change_type, ChangeType::Bootstrap);
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_audits_once() {
        let svc = service();
        let before = svc.get().await.unwrap();

        let patch = SettingsPatch {
            max_trades_per_day: Some(5),
            ..Default::default()
        };
        let after = svc
            .update(&patch, None, "tighter day limit")
            .await
            .unwrap();

        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.max_trades_per_day, 5);

        let audit = svc.audit(10).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].version, after.version);
        assert_eq!(audit[0].new_values["max_trades_per_day"], 5);
    }

    #[tokio::test]
    async fn test_identity_patch_is_noop() {
        let svc = service();
        let before = svc.get().await.unwrap();

        let patch = SettingsPatch {
            max_trades_per_day: Some(before.max_trades_per_day),
            ..Default::default()
        };
        let after = svc.update(&patch, None, "no change").await.unwrap();

        assert_eq!(after.version, before.version);
        assert_eq!(svc.audit(10).await.unwrap().len(), 1); // bootstrap only
    }

    #[tokio::test]
    async fn test_out_of_bounds_patch_rejected() {
        let svc = service();
        let patch = SettingsPatch {
            max_risk_per_trade_pct: Some(dec!(4.0)), // hard cap is 2.0
            ..Default::default()
        };
        let err = svc.update(&patch, None, "loosen").await.unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        // Failed mutation leaves prior state intact.
        let settings = svc.get().await.unwrap();
        assert_eq!(settings.version, 1);
        assert_eq!(svc.audit(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_live_requires_confirmation_even_with_password() {
        let svc = service();
        let user_id = Uuid::new_v4();
        svc.users
            .insert(&UserAccount {
                id: user_id,
                email: "ops@example.com".to_string(),
                password_hash: bcrypt::hash("hunter2", 4).unwrap(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let err = svc
            .set_execution_mode(
                ExecutionMode::Live,
                Some(user_id),
                Some("hunter2"),
                false,
                "go live",
            )
            .await
            .unwrap_err();
        match err {
            SettingsError::ModeBlocked { reason } => assert_eq!(reason, "exec_live_unconfirmed"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_live_requires_matching_password() {
        let svc = service();
        let user_id = Uuid::new_v4();
        svc.users
            .insert(&UserAccount {
                id: user_id,
                email: "ops@example.com".to_string(),
                password_hash: bcrypt::hash("hunter2", 4).unwrap(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let err = svc
            .set_execution_mode(
                ExecutionMode::Live,
                Some(user_id),
                Some("wrong"),
                true,
                "go live",
            )
            .await
            .unwrap_err();
        match err {
            SettingsError::ModeBlocked { reason } => assert_eq!(reason, "bad_password"),
            other => panic!("unexpected error: {other}"),
        }

        let ok = svc
            .set_execution_mode(
                ExecutionMode::Live,
                Some(user_id),
                Some("hunter2"),
                true,
                "go live",
            )
            .await
            .unwrap();
        assert_eq!(ok.exec_mode, ExecutionMode::Live);
    }

    #[tokio::test]
    async fn test_mode_change_writes_mode_change_audit() {
        let svc = service();
        svc.get().await.unwrap();
        let after = svc
            .set_mode(TradingMode::Autonomous, None, "going autonomous")
            .await
            .unwrap();
        assert_eq!(after.mode, TradingMode::Autonomous);

        let audit = svc.audit(1).await.unwrap();
        assert_eq!(audit[0].change_type, ChangeType::ModeChange);
    }

    struct DenyPolicy;

    #[async_trait]
    impl TransitionPolicy for DenyPolicy {
        async fn check_enter_autonomous(&self, _user: Option<UserId>) -> Result<(), String> {
            Err("emergency shutdown active".to_string())
        }
    }

    #[tokio::test]
    async fn test_transition_policy_blocks_autonomous() {
        let svc = service();
        svc.get().await.unwrap();
        svc.register_transition_policy(Arc::new(DenyPolicy)).await;

        let err = svc
            .set_mode(TradingMode::Autonomous, None, "try")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "mode_blocked");

        // autonomous -> guide is never gated
        let svc2 = service();
        svc2.get().await.unwrap();
        svc2.set_mode(TradingMode::Autonomous, None, "ok").await.unwrap();
        svc2.register_transition_policy(Arc::new(DenyPolicy)).await;
        svc2.set_mode(TradingMode::Guide, None, "back").await.unwrap();
    }
}
