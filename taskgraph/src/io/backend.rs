//! Language-model backends.
//!
//! The [`ModelBackend`] trait decouples the planner from how a completion is
//! produced. The shipped backend spawns a configured command and feeds it the
//! prompt on stdin; tests use scripted backends that return canned replies.

use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument};

use crate::error::PlanningError;
use crate::io::config::{ModelSpec, PlannerConfig};
use crate::io::process::{ProcessLimits, run_with_prompt};

/// Synchronous prompt-in, text-out completion.
pub trait ModelBackend {
    fn name(&self) -> &str;

    fn process(&self, prompt: &str) -> Result<String>;
}

pub type BackendRef = Arc<dyn ModelBackend + Send + Sync>;

type BackendFactory = fn(&ModelSpec) -> Result<BackendRef>;

/// Backend kinds that can appear in `[[models]].kind`.
pub static BACKEND_KINDS: &[(&str, BackendFactory)] = &[("command", command_backend)];

pub fn is_known_kind(kind: &str) -> bool {
    BACKEND_KINDS.iter().any(|(name, _)| *name == kind)
}

fn command_backend(spec: &ModelSpec) -> Result<BackendRef> {
    Ok(Arc::new(CommandBackend::from_spec(spec)?))
}

/// Backend that runs an external command per completion.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    name: String,
    program: String,
    args: Vec<String>,
    limits: ProcessLimits,
}

impl CommandBackend {
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| anyhow!("model '{}' has an empty command", spec.name))?;
        Ok(Self {
            name: spec.name.clone(),
            program: program.clone(),
            args: args.to_vec(),
            limits: ProcessLimits {
                timeout: Duration::from_secs(spec.timeout_secs),
                output_limit_bytes: spec.output_limit_bytes,
            },
        })
    }
}

impl ModelBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(model = %self.name, prompt_bytes = prompt.len()))]
    fn process(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        let output = run_with_prompt(cmd, prompt.as_bytes(), self.limits)?;

        if output.timed_out {
            return Err(anyhow!(
                "model '{}' timed out after {}s",
                self.name,
                self.limits.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "model '{}' exited with {}: {}",
                self.name,
                output.status,
                output.stderr.text().trim()
            ));
        }
        let reply = output.stdout.text().trim().to_string();
        debug!(reply_bytes = reply.len(), "model replied");
        Ok(reply)
    }
}

/// Named backends available to a run.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    backends: BTreeMap<String, BackendRef>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every `[[models]]` entry through the kind table.
    pub fn from_config(cfg: &PlannerConfig) -> Result<Self> {
        let mut registry = Self::new();
        for spec in &cfg.models {
            let factory = BACKEND_KINDS
                .iter()
                .find(|(kind, _)| *kind == spec.kind)
                .map(|(_, factory)| factory)
                .ok_or_else(|| PlanningError::UnknownModel(spec.kind.clone()))?;
            registry.register(spec.name.clone(), factory(spec)?);
        }
        info!(models = registry.backends.len(), "model registry ready");
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, backend: BackendRef) {
        self.backends.insert(name.into(), backend);
    }

    pub fn get(&self, name: &str) -> Result<BackendRef, PlanningError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| PlanningError::UnknownModel(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}
