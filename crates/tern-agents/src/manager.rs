// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The orchestrator.
//!
//! The agent table is mutex-guarded; each agent services a single-consumer
//! bounded queue, so no two tasks for the same agent ever run concurrently
//! while distinct agents run in parallel up to `max_concurrent_agents`.
//! `wait_for` blocks on a `Notify` fan-in — no busy-wait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use tern_config::{AgentConfig, OrchestratorConfig};
use tern_core::{Agent, AgentError, AgentStatus};
use tern_model::ModelProvider;
use tern_store::SessionStore;
use tern_tools::{validate, ToolRegistry};

use crate::task::{Task, TaskResult, TaskState};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("agent capacity exceeded (max {0} concurrent agents)")]
    CapacityExceeded(usize),

    #[error("unknown agent {0}")]
    UnknownAgent(Uuid),

    #[error("agent {0} is terminated")]
    AgentTerminated(Uuid),

    #[error("invalid agent name {0:?} (alphanumeric plus '-_', 1-64 chars)")]
    InvalidName(String),

    #[error("task queue for agent {0} is full")]
    QueueFull(Uuid),
}

/// Per-agent configuration overrides applied on top of the orchestrator's
/// defaults at spawn time.
#[derive(Default)]
pub struct AgentOverrides {
    pub model_provider: Option<Arc<dyn ModelProvider>>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_tool_rounds: Option<u32>,
}

/// Snapshot row for `list_agent_statuses`.
#[derive(Debug, Clone)]
pub struct AgentStatusInfo {
    pub id: Uuid,
    pub name: String,
    pub status: AgentStatus,
}

struct QueuedTask {
    task_id: Uuid,
    prompt: String,
}

struct AgentHandle {
    name: String,
    queue_tx: mpsc::Sender<QueuedTask>,
    cancel: CancellationToken,
    status: Arc<StdMutex<AgentStatus>>,
}

/// Shared with every agent worker.
struct Shared {
    tasks: StdMutex<HashMap<Uuid, Task>>,
    results: StdMutex<HashMap<Uuid, TaskResult>>,
    notify: Notify,
}

pub struct AgentManager {
    config: OrchestratorConfig,
    agent_defaults: AgentConfig,
    model: Arc<dyn ModelProvider>,
    store: Arc<dyn SessionStore>,
    /// Builds the tool registry handed to each sub-agent.  Orchestration
    /// tools are deliberately absent from it to bound nesting.
    sub_tools: Arc<dyn Fn() -> Arc<ToolRegistry> + Send + Sync>,
    agents: Mutex<HashMap<Uuid, AgentHandle>>,
    shared: Arc<Shared>,
}

impl AgentManager {
    pub fn new(
        config: OrchestratorConfig,
        agent_defaults: AgentConfig,
        model: Arc<dyn ModelProvider>,
        store: Arc<dyn SessionStore>,
        sub_tools: Arc<dyn Fn() -> Arc<ToolRegistry> + Send + Sync>,
    ) -> Self {
        Self {
            config,
            agent_defaults,
            model,
            store,
            sub_tools,
            agents: Mutex::new(HashMap::new()),
            shared: Arc::new(Shared {
                tasks: StdMutex::new(HashMap::new()),
                results: StdMutex::new(HashMap::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Number of live (non-terminated) agents.
    pub async fn agent_count(&self) -> usize {
        let agents = self.agents.lock().await;
        agents
            .values()
            .filter(|h| *h.status.lock().unwrap() != AgentStatus::Terminated)
            .count()
    }

    /// Spawn a sub-agent.  Fails with `CapacityExceeded` when the live-agent
    /// cap is reached; the cap check and the table insert happen under one
    /// lock, so the cap is never exceeded even under concurrent spawns.
    pub async fn create_agent(
        &self,
        name: &str,
        overrides: AgentOverrides,
    ) -> Result<Uuid, OrchestratorError> {
        if !validate::valid_agent_name(name) {
            return Err(OrchestratorError::InvalidName(name.to_string()));
        }

        let mut agents = self.agents.lock().await;
        let live = agents
            .values()
            .filter(|h| *h.status.lock().unwrap() != AgentStatus::Terminated)
            .count();
        if live >= self.config.max_concurrent_agents {
            return Err(OrchestratorError::CapacityExceeded(
                self.config.max_concurrent_agents,
            ));
        }

        let mut config = self.agent_defaults.clone();
        config.name = name.to_string();
        if let Some(p) = overrides.system_prompt {
            config.system_prompt = Some(p);
        }
        if let Some(t) = overrides.temperature {
            config.temperature = t;
        }
        if let Some(m) = overrides.max_tokens {
            config.max_tokens = m;
        }
        if let Some(r) = overrides.max_tool_rounds {
            config.max_tool_rounds = r;
        }
        let model = overrides
            .model_provider
            .unwrap_or_else(|| Arc::clone(&self.model));

        let mut agent = Agent::new(
            name,
            Arc::new(config),
            model,
            (self.sub_tools)(),
            Arc::clone(&self.store),
        );
        agent.init_store_session("sub-agent", None).await;
        let agent_id = agent.id();

        let (queue_tx, queue_rx) =
            mpsc::channel::<QueuedTask>(self.config.task_queue_depth.max(1));
        let cancel = CancellationToken::new();
        let status = Arc::new(StdMutex::new(AgentStatus::Idle));

        tokio::spawn(agent_worker(
            agent,
            queue_rx,
            cancel.clone(),
            Arc::clone(&status),
            Arc::clone(&self.shared),
        ));

        agents.insert(
            agent_id,
            AgentHandle {
                name: name.to_string(),
                queue_tx,
                cancel,
                status,
            },
        );
        debug!(agent = %name, id = %agent_id, "spawned sub-agent");
        Ok(agent_id)
    }

    /// Enqueue a task for an agent and return immediately with its id.
    pub async fn hand_off(
        &self,
        agent_id: Uuid,
        description: &str,
        context: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Uuid, OrchestratorError> {
        let agents = self.agents.lock().await;
        let handle = agents
            .get(&agent_id)
            .ok_or(OrchestratorError::UnknownAgent(agent_id))?;
        if *handle.status.lock().unwrap() == AgentStatus::Terminated {
            return Err(OrchestratorError::AgentTerminated(agent_id));
        }

        let task_id = Uuid::new_v4();
        let task = Task {
            id: task_id,
            agent_id,
            description: description.to_string(),
            context: context.clone(),
            state: TaskState::Queued,
            submitted_at: Utc::now(),
            completed_at: None,
        };
        self.shared.tasks.lock().unwrap().insert(task_id, task);

        let prompt = render_prompt(description, context.as_ref());
        if handle
            .queue_tx
            .try_send(QueuedTask { task_id, prompt })
            .is_err()
        {
            self.shared.tasks.lock().unwrap().remove(&task_id);
            return Err(OrchestratorError::QueueFull(agent_id));
        }
        Ok(task_id)
    }

    /// Block until every requested task has a result or the timeout elapses.
    /// Timed-out ids come back as `None`, in input order.
    pub async fn wait_for(
        &self,
        task_ids: &[Uuid],
        timeout: std::time::Duration,
    ) -> Vec<Option<TaskResult>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so a publish between the
            // check and the await cannot be missed.
            let notified = self.shared.notify.notified();
            {
                let results = self.shared.results.lock().unwrap();
                if task_ids.iter().all(|id| results.contains_key(id)) {
                    return task_ids.iter().map(|id| results.get(id).cloned()).collect();
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let results = self.shared.results.lock().unwrap();
                    return task_ids.iter().map(|id| results.get(id).cloned()).collect();
                }
            }
        }
    }

    pub fn get_task_result(&self, task_id: Uuid) -> Option<TaskResult> {
        self.shared.results.lock().unwrap().get(&task_id).cloned()
    }

    pub fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.shared.tasks.lock().unwrap().get(&task_id).cloned()
    }

    /// Cancel an agent's in-flight run, drain its queued tasks into
    /// `Cancelled`, and mark it terminated.
    pub async fn terminate_agent(&self, agent_id: Uuid) -> Result<(), OrchestratorError> {
        let mut agents = self.agents.lock().await;
        let handle = agents
            .get_mut(&agent_id)
            .ok_or(OrchestratorError::UnknownAgent(agent_id))?;
        self.terminate_handle(agent_id, handle);
        Ok(())
    }

    pub async fn terminate_all(&self) {
        let mut agents = self.agents.lock().await;
        let ids: Vec<Uuid> = agents.keys().copied().collect();
        for id in ids {
            if let Some(handle) = agents.get_mut(&id) {
                self.terminate_handle(id, handle);
            }
        }
    }

    fn terminate_handle(&self, agent_id: Uuid, handle: &mut AgentHandle) {
        // Queued tasks flip to Cancelled synchronously; the worker then
        // observes the token, abandons its run, and exits.
        {
            let mut tasks = self.shared.tasks.lock().unwrap();
            for task in tasks.values_mut() {
                if task.agent_id == agent_id && task.state == TaskState::Queued {
                    task.state = TaskState::Cancelled;
                    task.completed_at = Some(Utc::now());
                }
            }
        }
        handle.cancel.cancel();
        *handle.status.lock().unwrap() = AgentStatus::Terminated;
        self.shared.notify.notify_waiters();
        debug!(agent = %handle.name, id = %agent_id, "terminated agent");
    }

    pub async fn list_agent_statuses(&self) -> Vec<AgentStatusInfo> {
        let agents = self.agents.lock().await;
        let mut out: Vec<AgentStatusInfo> = agents
            .iter()
            .map(|(id, h)| AgentStatusInfo {
                id: *id,
                name: h.name.clone(),
                status: *h.status.lock().unwrap(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

fn render_prompt(
    description: &str,
    context: Option<&serde_json::Map<String, serde_json::Value>>,
) -> String {
    match context {
        Some(map) if !map.is_empty() => {
            let rendered = serde_json::to_string_pretty(map).unwrap_or_default();
            format!("{description}\n\nContext:\n{rendered}")
        }
        _ => description.to_string(),
    }
}

/// One worker per agent: single consumer of the agent's queue, so tasks for
/// the same agent never overlap.
async fn agent_worker(
    mut agent: Agent,
    mut queue_rx: mpsc::Receiver<QueuedTask>,
    cancel: CancellationToken,
    status: Arc<StdMutex<AgentStatus>>,
    shared: Arc<Shared>,
) {
    loop {
        let queued = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            q = queue_rx.recv() => match q {
                Some(q) => q,
                None => break,
            },
        };

        // Skip tasks that were cancelled while queued.
        {
            let mut tasks = shared.tasks.lock().unwrap();
            match tasks.get_mut(&queued.task_id) {
                Some(task) if task.state == TaskState::Queued => {
                    task.state = TaskState::Running;
                }
                _ => continue,
            }
        }
        *status.lock().unwrap() = AgentStatus::Busy;

        let started = Instant::now();
        let run_cancel = cancel.child_token();
        let outcome = agent.execute(&queued.prompt, &run_cancel).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let completed_at = Utc::now();

        let (state, result) = match outcome {
            Ok(text) => (
                TaskState::Completed,
                TaskResult {
                    task_id: queued.task_id,
                    success: true,
                    text,
                    completed_at,
                    duration_ms,
                },
            ),
            Err(AgentError::Cancelled) => (
                TaskState::Cancelled,
                TaskResult {
                    task_id: queued.task_id,
                    success: false,
                    text: "task cancelled".into(),
                    completed_at,
                    duration_ms,
                },
            ),
            Err(e) => {
                warn!(task = %queued.task_id, "sub-agent run failed: {e}");
                (
                    TaskState::Failed,
                    TaskResult {
                        task_id: queued.task_id,
                        success: false,
                        text: e.to_string(),
                        completed_at,
                        duration_ms,
                    },
                )
            }
        };

        {
            let mut tasks = shared.tasks.lock().unwrap();
            if let Some(task) = tasks.get_mut(&queued.task_id) {
                task.state = state;
                task.completed_at = Some(completed_at);
            }
        }
        shared.results.lock().unwrap().insert(queued.task_id, result);
        *status.lock().unwrap() = AgentStatus::Idle;
        shared.notify.notify_waiters();
    }

    // Termination path: anything still in the queue is already marked
    // Cancelled by the manager; drop the receiver and go quiet.
    *status.lock().unwrap() = AgentStatus::Terminated;
    shared.notify.notify_waiters();
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tern_model::mock::ScriptedProvider;
    use tern_store::NullStore;

    use super::*;

    fn manager_with(model: Arc<dyn ModelProvider>, max_agents: usize) -> AgentManager {
        AgentManager::new(
            OrchestratorConfig {
                max_concurrent_agents: max_agents,
                task_queue_depth: 8,
            },
            AgentConfig::default(),
            model,
            Arc::new(NullStore),
            Arc::new(|| Arc::new(ToolRegistry::new())),
        )
    }

    fn scripted(reply: &str) -> Arc<dyn ModelProvider> {
        Arc::new(ScriptedProvider::always_text(reply))
    }

    #[tokio::test]
    async fn create_and_hand_off_completes_task() {
        let manager = manager_with(scripted("task done"), 3);
        let agent_id = manager
            .create_agent("worker-1", AgentOverrides::default())
            .await
            .unwrap();
        let task_id = manager.hand_off(agent_id, "do the thing", None).await.unwrap();

        let results = manager
            .wait_for(&[task_id], Duration::from_secs(2))
            .await;
        let result = results[0].as_ref().expect("task should complete");
        assert!(result.success);
        assert_eq!(result.text, "task done");
        assert_eq!(manager.get_task(task_id).unwrap().state, TaskState::Completed);
    }

    #[tokio::test]
    async fn capacity_cap_is_enforced() {
        let manager = manager_with(scripted("x"), 2);
        manager.create_agent("a1", AgentOverrides::default()).await.unwrap();
        manager.create_agent("a2", AgentOverrides::default()).await.unwrap();
        let err = manager
            .create_agent("a3", AgentOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CapacityExceeded(2)));
        assert_eq!(manager.agent_count().await, 2);
    }

    #[tokio::test]
    async fn terminating_frees_capacity() {
        let manager = manager_with(scripted("x"), 1);
        let a1 = manager.create_agent("a1", AgentOverrides::default()).await.unwrap();
        manager.terminate_agent(a1).await.unwrap();
        // The slot is free again.
        manager.create_agent("a2", AgentOverrides::default()).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_agent_name_rejected() {
        let manager = manager_with(scripted("x"), 2);
        let err = manager
            .create_agent("bad name!", AgentOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidName(_)));
    }

    #[tokio::test]
    async fn wait_for_times_out_with_none_in_order() {
        // T1 and T2 complete quickly; T3 never does (its provider stalls
        // longer than the wait timeout).
        let manager = manager_with(scripted("unused-default"), 3);

        let fast1 = manager
            .create_agent(
                "fast1",
                AgentOverrides {
                    model_provider: Some(Arc::new(
                        ScriptedProvider::always_text("one").with_delay(Duration::from_millis(100)),
                    )),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let fast2 = manager
            .create_agent(
                "fast2",
                AgentOverrides {
                    model_provider: Some(Arc::new(
                        ScriptedProvider::always_text("two").with_delay(Duration::from_millis(50)),
                    )),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let slow = manager
            .create_agent(
                "slow",
                AgentOverrides {
                    model_provider: Some(Arc::new(
                        ScriptedProvider::always_text("never").with_delay(Duration::from_secs(30)),
                    )),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let t1 = manager.hand_off(fast1, "t1", None).await.unwrap();
        let t2 = manager.hand_off(fast2, "t2", None).await.unwrap();
        let t3 = manager.hand_off(slow, "t3", None).await.unwrap();

        let results = manager
            .wait_for(&[t1, t2, t3], Duration::from_millis(500))
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().text, "one");
        assert_eq!(results[1].as_ref().unwrap().text, "two");
        assert!(results[2].is_none(), "t3 must time out as null");
    }

    #[tokio::test]
    async fn tasks_for_one_agent_run_sequentially() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text_script("first"),
            ScriptedProvider::text_script("second"),
        ]);
        let manager = manager_with(scripted("unused"), 2);
        let agent_id = manager
            .create_agent(
                "serial",
                AgentOverrides {
                    model_provider: Some(Arc::new(provider)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let t1 = manager.hand_off(agent_id, "one", None).await.unwrap();
        let t2 = manager.hand_off(agent_id, "two", None).await.unwrap();
        let results = manager
            .wait_for(&[t1, t2], Duration::from_secs(2))
            .await;
        // Scripts pop in order, so sequential servicing maps t1→first, t2→second.
        assert_eq!(results[0].as_ref().unwrap().text, "first");
        assert_eq!(results[1].as_ref().unwrap().text, "second");
    }

    #[tokio::test]
    async fn terminate_cancels_queued_tasks() {
        let manager = manager_with(scripted("unused"), 2);
        let agent_id = manager
            .create_agent(
                "victim",
                AgentOverrides {
                    model_provider: Some(Arc::new(
                        ScriptedProvider::always_text("slow").with_delay(Duration::from_secs(30)),
                    )),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let running = manager.hand_off(agent_id, "in flight", None).await.unwrap();
        let queued = manager.hand_off(agent_id, "waiting", None).await.unwrap();
        // Give the worker a moment to pick up the first task.
        tokio::time::sleep(Duration::from_millis(50)).await;

        manager.terminate_agent(agent_id).await.unwrap();

        assert_eq!(manager.get_task(queued).unwrap().state, TaskState::Cancelled);
        // The in-flight run observes cancellation and publishes a failed result.
        let results = manager
            .wait_for(&[running], Duration::from_secs(2))
            .await;
        assert!(!results[0].as_ref().unwrap().success);

        let err = manager.hand_off(agent_id, "more", None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AgentTerminated(_)));
    }

    #[tokio::test]
    async fn context_is_rendered_into_the_prompt() {
        let mut map = serde_json::Map::new();
        map.insert("branch".into(), serde_json::Value::String("main".into()));
        let prompt = render_prompt("review the diff", Some(&map));
        assert!(prompt.starts_with("review the diff"));
        assert!(prompt.contains("Context:"));
        assert!(prompt.contains("main"));
        assert_eq!(render_prompt("plain", None), "plain");
    }

    #[tokio::test]
    async fn unknown_agent_hand_off_fails() {
        let manager = manager_with(scripted("x"), 2);
        let err = manager
            .hand_off(Uuid::new_v4(), "nope", None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownAgent(_)));
    }

    #[tokio::test]
    async fn statuses_snapshot_lists_all_agents() {
        let manager = manager_with(scripted("x"), 3);
        manager.create_agent("alpha", AgentOverrides::default()).await.unwrap();
        manager.create_agent("beta", AgentOverrides::default()).await.unwrap();
        let statuses = manager.list_agent_statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "alpha");
        assert_eq!(statuses[1].name, "beta");
    }
}
