//! Cached agent/project state with validated mutations.
//!
//! The state manager is the sole mutation path for agent rows:
//! [`StateManager::update_agent`] is a read-modify-write against the store
//! with a role-mismatch check and transition validation, followed by cache
//! invalidation. A short-TTL read cache (per-role keys plus one all-agents
//! key) accelerates the hot reads the supervisor issues every tick.

pub mod transitions;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::info;

use foreman_db::models::{Agent, AgentStatus, Project, ProjectPhase};
use foreman_db::queries::agents::{self, NewAgent};
use foreman_db::queries::projects;

use crate::roster::Roster;

/// Normalize a role for in-memory comparison and map keys.
pub fn normalize_role(role: &str) -> String {
    role.trim().to_lowercase()
}

struct CacheEntry<T> {
    inserted: Instant,
    value: T,
}

impl<T> CacheEntry<T> {
    fn fresh(value: T) -> Self {
        Self {
            inserted: Instant::now(),
            value,
        }
    }

    fn live(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() <= ttl
    }
}

/// Cached read/mutate access to agent and project state.
pub struct StateManager {
    pool: SqlitePool,
    cache_ttl: Duration,
    agent_cache: Mutex<HashMap<String, CacheEntry<Agent>>>,
    all_cache: Mutex<Option<CacheEntry<Vec<Agent>>>>,
}

impl StateManager {
    pub fn new(pool: SqlitePool, cache_ttl: Duration) -> Self {
        Self {
            pool,
            cache_ttl,
            agent_cache: Mutex::new(HashMap::new()),
            all_cache: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------
    // Project
    // -------------------------------------------------------------------

    /// Create the project singleton, or return the existing row on restart.
    pub async fn initialize_project(
        &self,
        name: &str,
        working_dir: &str,
        brief: Option<&str>,
    ) -> Result<Project> {
        if let Some(existing) = projects::get_project(&self.pool).await? {
            info!(name = %existing.name, "project already initialized, resuming");
            return Ok(existing);
        }
        let project = projects::insert_project(&self.pool, name, working_dir, brief).await?;
        info!(name = %project.name, dir = %project.working_dir, "project initialized");
        Ok(project)
    }

    /// Seed agent rows from the roster. Existing rows keep their state
    /// (restart recovery); returns how many rows were created.
    pub async fn seed_from_roster(&self, roster: &Roster) -> Result<usize> {
        let mut created = 0;
        for spec in &roster.agents {
            let role = normalize_role(&spec.role);
            let deps: Vec<String> = spec.depends_on.iter().map(|d| normalize_role(d)).collect();
            let inserted = agents::insert_agent(
                &self.pool,
                &NewAgent {
                    role: &role,
                    worker_kind: &spec.worker_kind,
                    dependencies: &deps,
                },
            )
            .await?;
            if inserted.is_some() {
                created += 1;
            }
        }
        self.invalidate_all().await;
        Ok(created)
    }

    /// Fetch the project singleton. Errors if no project row exists yet.
    pub async fn get_project(&self) -> Result<Project> {
        match projects::get_project(&self.pool).await? {
            Some(project) => Ok(project),
            None => bail!("project not initialized"),
        }
    }

    /// Set the project phase, logging the transition.
    pub async fn update_phase(&self, phase: ProjectPhase) -> Result<()> {
        let current = self.get_project().await?;
        if current.phase == phase {
            return Ok(());
        }
        let rows = projects::update_phase(&self.pool, phase).await?;
        if rows == 0 {
            bail!("project not initialized");
        }
        info!(from = %current.phase, to = %phase, "project phase transition");
        Ok(())
    }

    // -------------------------------------------------------------------
    // Agents
    // -------------------------------------------------------------------

    /// Fetch a single agent by role, through the read cache.
    pub async fn get_agent(&self, role: &str) -> Result<Agent> {
        let key = normalize_role(role);
        {
            let cache = self.agent_cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.live(self.cache_ttl) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let agent = agents::get_agent(&self.pool, &key)
            .await?
            .with_context(|| format!("agent role {role:?} not found"))?;

        self.agent_cache
            .lock()
            .await
            .insert(key, CacheEntry::fresh(agent.clone()));
        Ok(agent)
    }

    /// Fetch all agents, through the read cache.
    pub async fn get_all_agents(&self) -> Result<Vec<Agent>> {
        {
            let cache = self.all_cache.lock().await;
            if let Some(entry) = cache.as_ref() {
                if entry.live(self.cache_ttl) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let all = agents::list_agents(&self.pool).await?;
        *self.all_cache.lock().await = Some(CacheEntry::fresh(all.clone()));
        Ok(all)
    }

    /// Read-modify-write an agent row.
    ///
    /// Reads the current row from the store (never the cache), applies the
    /// mutator, validates that the role was not changed and that any status
    /// change is a legal transition, writes back, and invalidates caches.
    /// This is the sole mutation path for agent rows.
    pub async fn update_agent<F>(&self, role: &str, mutator: F) -> Result<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let key = normalize_role(role);
        let current = agents::get_agent(&self.pool, &key)
            .await?
            .with_context(|| format!("agent role {role:?} not found"))?;

        let before_status = current.status;
        let mut updated = current;
        mutator(&mut updated);

        if normalize_role(&updated.role) != key {
            bail!(
                "role mismatch: mutator changed role {:?} to {:?}",
                key,
                updated.role
            );
        }

        if updated.status != before_status
            && !transitions::is_valid_transition(before_status, updated.status)
        {
            bail!(
                "invalid status transition: {} -> {} for role {:?}",
                before_status,
                updated.status,
                key
            );
        }

        let rows = agents::update_agent_row(&self.pool, &updated).await?;
        if rows == 0 {
            bail!("agent role {role:?} disappeared during update");
        }

        self.invalidate(&key).await;

        if updated.status != before_status {
            info!(
                role = %key,
                from = %before_status,
                to = %updated.status,
                "agent status transition"
            );
        }

        Ok(updated)
    }

    /// Agents with a live (or starting) worker.
    pub async fn get_active_agents(&self) -> Result<Vec<Agent>> {
        let all = self.get_all_agents().await?;
        Ok(all.into_iter().filter(|a| a.status.is_active()).collect())
    }

    /// Agents eligible to make progress: pending or queued, with every
    /// dependency completed.
    ///
    /// Computes a completion set over all agents, then filters by
    /// `dependencies` (serialized on each row at seed time) being a subset.
    pub async fn get_ready_agents(&self) -> Result<Vec<Agent>> {
        let all = self.get_all_agents().await?;

        let completed: HashSet<String> = all
            .iter()
            .filter(|a| a.status == AgentStatus::Completed)
            .map(|a| normalize_role(&a.role))
            .collect();

        Ok(all
            .into_iter()
            .filter(|a| matches!(a.status, AgentStatus::Pending | AgentStatus::Queued))
            .filter(|a| {
                a.dependencies
                    .0
                    .iter()
                    .all(|dep| completed.contains(&normalize_role(dep)))
            })
            .collect())
    }

    // -------------------------------------------------------------------
    // Cache plumbing
    // -------------------------------------------------------------------

    async fn invalidate(&self, key: &str) {
        self.agent_cache.lock().await.remove(key);
        *self.all_cache.lock().await = None;
    }

    async fn invalidate_all(&self) {
        self.agent_cache.lock().await.clear();
        *self.all_cache.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_role_trims_and_lowercases() {
        assert_eq!(normalize_role(" Architect "), "architect");
        assert_eq!(normalize_role("TESTER"), "tester");
    }

    #[test]
    fn cache_entry_expires_after_ttl() {
        let entry = CacheEntry::fresh(1u32);
        assert!(entry.live(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(2));
        assert!(!entry.live(Duration::from_millis(1)));
    }
}
