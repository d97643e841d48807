//! Conversation → sandbox environment mapping
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  SandboxRegistry                                                 │
//! │                                                                  │
//! │  slots: conv-a ─► Mutex<Option<Provisioned>>  (one per id)      │
//! │         conv-b ─► Mutex<Option<Provisioned>>                     │
//! │                                                                  │
//! │  runs:  conv-a ─► RunTicket { run_id, CancellationToken }        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each conversation id owns one async slot lock; create, destroy and reset
//! for that id all happen while holding it. A slot left empty is removed
//! from the map under its lock, and a lock holder whose slot is no longer
//! the mapped one starts over. Environment identifiers and workspace
//! directories both embed the (validated) conversation id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::catalog::{self, BackendKind, EnvironmentConfig};
use super::container::ContainerEnvironment;
use super::environment::{SandboxEnvironment, SandboxError};
use super::local::LocalEnvironment;
use super::workspace::Workspace;
use crate::config::RegistryConfig;
use crate::metrics::SANDBOXES_ACTIVE;
use crate::security::{resource_profile, ResourceProfile};

const MAX_CONVERSATION_ID_LEN: usize = 128;

struct Provisioned {
    env: Arc<dyn SandboxEnvironment>,
    environment_type: String,
    config: EnvironmentConfig,
}

type Slot = Arc<Mutex<Option<Provisioned>>>;
type SlotGuard = OwnedMutexGuard<Option<Provisioned>>;

/// Handle for the run currently owning a conversation
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub token: CancellationToken,
}

pub struct SandboxRegistry {
    config: RegistryConfig,
    profile: ResourceProfile,
    slots: StdMutex<HashMap<String, Slot>>,
    runs: StdMutex<HashMap<String, RunTicket>>,
}

/// Accept only ids that are safe as a directory and container name component
pub fn validate_conversation_id(conversation_id: &str) -> Result<(), SandboxError> {
    let valid = !conversation_id.is_empty()
        && conversation_id.len() <= MAX_CONVERSATION_ID_LEN
        && conversation_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SandboxError::InvalidConversationId(
            conversation_id.to_string(),
        ))
    }
}

impl SandboxRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            profile: resource_profile(),
            slots: StdMutex::new(HashMap::new()),
            runs: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Environment identifier for a conversation
    pub fn sandbox_id(&self, conversation_id: &str) -> String {
        format!("{}-{}", self.config.name_prefix, conversation_id)
    }

    /// Host directory mounted as the conversation's `/workspace`
    pub fn workspace_dir(&self, conversation_id: &str) -> PathBuf {
        self.config.workspace_root.join(conversation_id)
    }

    fn slot(&self, conversation_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn existing_slot(&self, conversation_id: &str) -> Option<Slot> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(conversation_id).cloned()
    }

    fn is_mapped(&self, conversation_id: &str, slot: &Slot) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(conversation_id)
            .map_or(false, |mapped| Arc::ptr_eq(mapped, slot))
    }

    /// Lock the conversation's slot, creating it if needed
    async fn lock_slot(&self, conversation_id: &str) -> (Slot, SlotGuard) {
        loop {
            let slot = self.slot(conversation_id);
            let guard = slot.clone().lock_owned().await;
            if self.is_mapped(conversation_id, &slot) {
                return (slot, guard);
            }
        }
    }

    /// Lock an existing slot; `None` when the id is unknown or was pruned
    async fn lock_existing(&self, conversation_id: &str) -> Option<(Slot, SlotGuard)> {
        loop {
            let slot = self.existing_slot(conversation_id)?;
            let guard = slot.clone().lock_owned().await;
            if self.is_mapped(conversation_id, &slot) {
                return Some((slot, guard));
            }
        }
    }

    /// Forget an empty slot; the caller holds its lock
    fn prune(&self, conversation_id: &str, slot: &Slot, guard: &SlotGuard) {
        if guard.is_some() {
            return;
        }
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots
            .get(conversation_id)
            .map_or(false, |mapped| Arc::ptr_eq(mapped, slot))
        {
            slots.remove(conversation_id);
        }
    }

    /// Conversations the registry currently tracks
    pub fn tracked_conversations(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Return the conversation's live environment, or provision one
    ///
    /// A remembered environment that no longer reports running is torn down
    /// and replaced (same identifier and workspace).
    pub async fn create_or_reuse(
        &self,
        conversation_id: &str,
        environment_type: &str,
        config: &EnvironmentConfig,
    ) -> Result<Arc<dyn SandboxEnvironment>, SandboxError> {
        validate_conversation_id(conversation_id)?;

        let (slot, mut guard) = self.lock_slot(conversation_id).await;

        if let Some(existing) = guard.as_ref() {
            if existing.env.is_running().await {
                debug!(
                    conversation_id,
                    sandbox = %existing.env.id(),
                    "Reusing sandbox"
                );
                return Ok(existing.env.clone());
            }
        }

        if let Some(stale) = guard.take() {
            warn!(
                conversation_id,
                sandbox = %stale.env.id(),
                "Sandbox no longer running, replacing"
            );
            stale.env.remove().await;
            SANDBOXES_ACTIVE.dec();
        }

        let env = match self.provision(conversation_id, environment_type, config).await {
            Ok(env) => env,
            Err(e) => {
                self.prune(conversation_id, &slot, &guard);
                return Err(e);
            }
        };
        *guard = Some(Provisioned {
            env: env.clone(),
            environment_type: environment_type.to_string(),
            config: config.clone(),
        });
        SANDBOXES_ACTIVE.inc();

        Ok(env)
    }

    async fn provision(
        &self,
        conversation_id: &str,
        environment_type: &str,
        config: &EnvironmentConfig,
    ) -> Result<Arc<dyn SandboxEnvironment>, SandboxError> {
        let spec = catalog::resolve(environment_type, config)?;
        let id = self.sandbox_id(conversation_id);
        let workspace_dir = self.workspace_dir(conversation_id);

        let env: Arc<dyn SandboxEnvironment> = match spec.backend {
            BackendKind::Local => Arc::new(LocalEnvironment::provision(
                id,
                conversation_id.to_string(),
                &workspace_dir,
                &self.profile,
                config
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )?),
            BackendKind::Container => {
                let image = spec.image.ok_or_else(|| {
                    SandboxError::Provision(format!(
                        "no image configured for environment type {}",
                        spec.environment_type
                    ))
                })?;
                Arc::new(
                    ContainerEnvironment::provision(
                        id,
                        conversation_id.to_string(),
                        image,
                        &workspace_dir,
                        &self.profile,
                        config,
                    )
                    .await?,
                )
            }
        };

        info!(
            conversation_id,
            sandbox = %env.id(),
            backend = env.backend(),
            environment_type = %spec.environment_type,
            "Sandbox provisioned"
        );
        Ok(env)
    }

    /// Current environment for a conversation, if any
    pub async fn get(&self, conversation_id: &str) -> Option<Arc<dyn SandboxEnvironment>> {
        let (_slot, guard) = self.lock_existing(conversation_id).await?;
        guard.as_ref().map(|p| p.env.clone())
    }

    /// Tear down and forget the conversation's environment
    ///
    /// Workspace files stay on disk. Returns false if nothing was provisioned.
    pub async fn destroy(&self, conversation_id: &str) -> bool {
        let Some((slot, mut guard)) = self.lock_existing(conversation_id).await else {
            return false;
        };
        let Some(provisioned) = guard.take() else {
            self.prune(conversation_id, &slot, &guard);
            return false;
        };
        self.prune(conversation_id, &slot, &guard);

        provisioned.env.stop().await;
        provisioned.env.remove().await;
        SANDBOXES_ACTIVE.dec();
        info!(conversation_id, sandbox = %provisioned.env.id(), "Sandbox destroyed");
        true
    }

    /// Destroy, wipe the workspace and provision a clean environment
    ///
    /// Returns `Ok(false)` if nothing was provisioned for the id.
    pub async fn reset(&self, conversation_id: &str) -> Result<bool, SandboxError> {
        let Some((slot, mut guard)) = self.lock_existing(conversation_id).await else {
            return Ok(false);
        };
        let Some(previous) = guard.take() else {
            self.prune(conversation_id, &slot, &guard);
            return Ok(false);
        };

        previous.env.stop().await;
        previous.env.remove().await;
        SANDBOXES_ACTIVE.dec();

        let env = match self.wipe_and_provision(conversation_id, &previous).await {
            Ok(env) => env,
            Err(e) => {
                self.prune(conversation_id, &slot, &guard);
                return Err(e);
            }
        };
        *guard = Some(Provisioned {
            env,
            environment_type: previous.environment_type,
            config: previous.config,
        });
        SANDBOXES_ACTIVE.inc();

        info!(conversation_id, "Sandbox reset");
        Ok(true)
    }

    async fn wipe_and_provision(
        &self,
        conversation_id: &str,
        previous: &Provisioned,
    ) -> Result<Arc<dyn SandboxEnvironment>, SandboxError> {
        Workspace::create(self.workspace_dir(conversation_id))?
            .wipe()
            .await?;
        self.provision(conversation_id, &previous.environment_type, &previous.config)
            .await
    }

    /// Destroy every environment and cancel every registered run
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.keys().cloned().collect()
        };
        for id in ids {
            self.destroy(&id).await;
        }

        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        for (_, ticket) in runs.drain() {
            ticket.token.cancel();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Run registration
    // ═══════════════════════════════════════════════════════════════════════
    // At most one run owns a conversation. Registering a new one cancels the
    // previous token before the new ticket becomes visible.
    // ═══════════════════════════════════════════════════════════════════════

    pub fn register_run(&self, conversation_id: &str) -> RunTicket {
        let ticket = RunTicket {
            run_id: Uuid::now_v7(),
            token: CancellationToken::new(),
        };

        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = runs.remove(conversation_id) {
            previous.token.cancel();
            info!(
                conversation_id,
                previous_run = %previous.run_id,
                "Cancelled previous run"
            );
        }
        runs.insert(conversation_id.to_string(), ticket.clone());
        ticket
    }

    /// Cancel the conversation's current run
    ///
    /// Returns false when no run is registered or it was already cancelled.
    pub fn cancel_run(&self, conversation_id: &str) -> bool {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        match runs.get(conversation_id) {
            Some(ticket) if !ticket.token.is_cancelled() => {
                ticket.token.cancel();
                info!(conversation_id, run_id = %ticket.run_id, "Run cancelled");
                true
            }
            _ => false,
        }
    }

    /// Forget a run, but only if it is still the conversation's current one
    pub fn finish_run(&self, conversation_id: &str, run_id: Uuid) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if runs.get(conversation_id).map(|t| t.run_id) == Some(run_id) {
            runs.remove(conversation_id);
        }
    }

    pub fn active_run(&self, conversation_id: &str) -> Option<Uuid> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(conversation_id).map(|t| t.run_id)
    }
}
