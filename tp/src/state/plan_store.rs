//! Plan storage
//!
//! Each plan lives in its own directory under the store root:
//!
//! ```text
//! {root}/{plan-id}/plan.json      plan status document
//! {root}/{plan-id}/.lock          present while a run is in progress
//! {root}/{plan-id}/logs/          per-attempt output logs
//! {root}/{plan-id}/events.jsonl   run event log
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, bail};
use tracing::{debug, info, warn};

use super::atomic::write_atomic;
use crate::domain::{Plan, PlanDefinition, is_valid_plan_id};

/// Plan status file name inside a plan directory
pub const PLAN_FILE: &str = "plan.json";

/// Load `plan.json` from a plan directory
pub fn load_plan(plan_dir: &Path) -> Result<Plan> {
    let path = plan_dir.join(PLAN_FILE);
    debug!(?path, "load_plan: called");
    let content = fs::read_to_string(&path).with_context(|| format!("Failed to read plan file {}", path.display()))?;
    let plan = serde_json::from_str(&content).with_context(|| format!("Failed to parse plan file {}", path.display()))?;
    Ok(plan)
}

/// Atomically replace `plan.json` in a plan directory
pub fn save_plan(plan_dir: &Path, plan: &Plan) -> Result<()> {
    let path = plan_dir.join(PLAN_FILE);
    debug!(?path, status = %plan.status, "save_plan: called");
    let json = serde_json::to_string_pretty(plan).context("Failed to serialize plan")?;
    write_atomic(&path, json.as_bytes()).with_context(|| format!("Failed to write plan file {}", path.display()))
}

/// Read a YAML or JSON plan definition into a new plan
pub fn read_definition(path: &Path) -> Result<Plan> {
    debug!(?path, "read_definition: called");
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let definition: PlanDefinition =
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse plan definition {}", path.display()))?;
    if definition.tasks.is_empty() {
        bail!("Plan definition {} has no tasks", path.display());
    }
    Ok(definition.into_plan())
}

/// Directory-per-plan store
#[derive(Debug, Clone)]
pub struct PlanStore {
    root: PathBuf,
}

impl PlanStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(?root, "PlanStore::new: called");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a plan ID
    pub fn plan_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Persist a new plan; fails if the ID is already taken
    pub fn create(&self, plan: &Plan) -> Result<PathBuf> {
        debug!(id = %plan.id, "PlanStore::create: called");
        if !is_valid_plan_id(&plan.id) {
            bail!("Invalid plan ID '{}'", plan.id);
        }
        let dir = self.plan_dir(&plan.id);
        if dir.join(PLAN_FILE).exists() {
            bail!("Plan {} already exists at {}", plan.id, dir.display());
        }
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create plan dir {}", dir.display()))?;
        save_plan(&dir, plan)?;
        info!(id = %plan.id, name = %plan.name, "Plan created");
        Ok(dir)
    }

    pub fn load(&self, id: &str) -> Result<Plan> {
        debug!(%id, "PlanStore::load: called");
        let dir = self.plan_dir(id);
        if !dir.join(PLAN_FILE).exists() {
            bail!("Plan {} not found in {}", id, self.root.display());
        }
        load_plan(&dir)
    }

    pub fn save(&self, plan: &Plan) -> Result<()> {
        debug!(id = %plan.id, "PlanStore::save: called");
        save_plan(&self.plan_dir(&plan.id), plan)
    }

    /// All readable plans, sorted by ID
    ///
    /// Directories without a parseable `plan.json` are skipped.
    pub fn list(&self) -> Result<Vec<Plan>> {
        debug!(root = ?self.root, "PlanStore::list: called");
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read plans dir {}", self.root.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.join(PLAN_FILE).is_file())
            .collect();
        dirs.sort();

        let mut plans = Vec::new();
        for dir in dirs {
            match load_plan(&dir) {
                Ok(plan) => plans.push(plan),
                Err(e) => warn!(?dir, error = %e, "PlanStore::list: skipping unreadable plan"),
            }
        }
        Ok(plans)
    }
}
