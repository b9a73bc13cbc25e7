//! Drives an [`AgentTask`] from IDLE to a terminal state.
//!
//! Steps run strictly in plan order. The first failing step ends the round,
//! and verification decides between COMPLETED, another round, or FAILED.
//! Successful step outputs are cached per task and step id, so a retry round
//! (or a second run of the same task) only re-runs what did not succeed.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::AgentSettings;
use crate::domain::EvaluatedChange;

use super::error::{AgentResult, StepError};
use super::runner::{StepOutput, StepRunner};
use super::state::{AgentEvent, AgentState};
use super::task::{plan, AgentReport, AgentTask, StepStatus};

/// Abort reason recorded when the owning change gets a newer revision.
pub const SUPERSEDED_REASON: &str = "superseded";

/// Successful step outputs keyed by `(task_id, step_id)`.
///
/// Holds at most `capacity` tasks; caching a step for a new task beyond that
/// evicts the least recently inserted task.
#[derive(Debug)]
pub struct StepCache {
    capacity: usize,
    inner: Mutex<CacheEntries>,
}

#[derive(Debug, Default)]
struct CacheEntries {
    tasks: HashMap<String, HashMap<String, StepOutput>>,
    order: VecDeque<String>,
}

impl Default for StepCache {
    fn default() -> Self {
        Self::with_capacity(AgentSettings::default().cached_tasks)
    }
}

impl StepCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheEntries::default()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, CacheEntries> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, task_id: &str, step_id: &str) -> Option<StepOutput> {
        self.entries().tasks.get(task_id)?.get(step_id).cloned()
    }

    pub fn insert(&self, task_id: &str, step_id: &str, output: StepOutput) {
        let mut entries = self.entries();
        if !entries.tasks.contains_key(task_id) {
            while entries.order.len() >= self.capacity {
                let Some(oldest) = entries.order.pop_front() else {
                    break;
                };
                entries.tasks.remove(&oldest);
                debug!(task_id = %oldest, "step cache evicted task");
            }
            entries.order.push_back(task_id.to_string());
        }
        entries
            .tasks
            .entry(task_id.to_string())
            .or_default()
            .insert(step_id.to_string(), output);
    }

    /// Drop every cached step of `task_id`.
    pub fn evict(&self, task_id: &str) {
        let mut entries = self.entries();
        if entries.tasks.remove(task_id).is_some() {
            entries.order.retain(|t| t != task_id);
        }
    }

    /// Number of cached steps across all tasks.
    pub fn len(&self) -> usize {
        self.entries().tasks.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks with cached steps.
    pub fn task_count(&self) -> usize {
        self.entries().tasks.len()
    }
}

pub struct Agent {
    runner: Arc<dyn StepRunner>,
    cache: Arc<StepCache>,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(runner: Arc<dyn StepRunner>, settings: AgentSettings) -> Self {
        Self {
            runner,
            cache: Arc::new(StepCache::with_capacity(settings.cached_tasks)),
            settings,
        }
    }

    /// Share a step cache between agents.
    pub fn with_cache(mut self, cache: Arc<StepCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<StepCache> {
        &self.cache
    }

    /// Run `task` to completion with no external cancellation.
    pub async fn run(&self, task: AgentTask) -> AgentResult<AgentReport> {
        let (_keep, cancel) = watch::channel(false);
        self.run_cancellable(task, cancel).await
    }

    /// Run `task` until it is terminal or `cancel` turns `true`.
    ///
    /// A cancelled task ends FAILED with reason [`SUPERSEDED_REASON`].
    pub async fn run_cancellable(
        &self,
        mut task: AgentTask,
        mut cancel: watch::Receiver<bool>,
    ) -> AgentResult<AgentReport> {
        task.apply(AgentEvent::RequestReceived)?;

        let request = task.request.clone();
        let analysis = match self
            .guarded(&mut cancel, self.runner.analyze(&request))
            .await
        {
            Ok(analysis) => analysis,
            Err(err) => {
                task.apply(AgentEvent::Aborted {
                    reason: abort_reason(&err),
                })?;
                return task.into_report();
            }
        };
        task.analysis = Some(analysis.clone());
        task.apply(AgentEvent::AnalysisDone)?;

        task.steps = plan(&analysis, self.settings.max_issue_probability);
        task.apply(AgentEvent::PlanProduced)?;

        while task.state() == AgentState::Executing {
            task.rounds += 1;
            if let Err(reason) = self.execute_round(&mut task, &analysis, &mut cancel).await {
                task.apply(AgentEvent::Aborted { reason })?;
                break;
            }
            task.apply(AgentEvent::StepsAttempted)?;

            let all_succeeded = task.all_succeeded();
            let retry_available = !all_succeeded && task.rounds <= self.settings.max_retries;
            task.apply(AgentEvent::Verified {
                all_succeeded,
                retry_available,
            })?;
        }

        task.into_report()
    }

    /// One pass over the plan. `Err` carries an abort reason.
    async fn execute_round(
        &self,
        task: &mut AgentTask,
        analysis: &EvaluatedChange,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), String> {
        for i in 0..task.steps.len() {
            if *cancel.borrow() {
                return Err(SUPERSEDED_REASON.to_string());
            }
            if task.steps[i].status == StepStatus::Succeeded {
                continue;
            }

            let step_id = task.steps[i].id.clone();
            if let Some(cached) = self.cache.get(&task.id, &step_id) {
                debug!(task_id = %task.id, step_id = %step_id, "step served from cache");
                let step = &mut task.steps[i];
                step.status = StepStatus::Succeeded;
                step.executed = Some(cached.summary);
                continue;
            }

            task.steps[i].runs += 1;
            let result = self
                .guarded(
                    cancel,
                    self.runner.run_step(&task.id, &task.steps[i], analysis),
                )
                .await;

            let step = &mut task.steps[i];
            match result {
                Ok(output) => {
                    step.status = StepStatus::Succeeded;
                    step.executed = Some(output.summary.clone());
                    self.cache.insert(&task.id, &step_id, output);
                }
                Err(err @ StepError::Cancelled(_)) => return Err(abort_reason(&err)),
                Err(err) => {
                    warn!(task_id = %task.id, step_id = %step_id, error = %err, "step failed");
                    step.status = StepStatus::Failed;
                    step.executed = Some(err.to_string());
                    break;
                }
            }
        }
        Ok(())
    }

    /// Bound `fut` by the step timeout and the cancel flag.
    async fn guarded<T>(
        &self,
        cancel: &mut watch::Receiver<bool>,
        fut: impl Future<Output = Result<T, StepError>>,
    ) -> Result<T, StepError> {
        let timeout = self.settings.step_timeout();
        tokio::select! {
            biased;
            Ok(_) = cancel.wait_for(|c| *c) => {
                Err(StepError::Cancelled(SUPERSEDED_REASON.to_string()))
            }
            result = tokio::time::timeout(timeout, fut) => {
                result.unwrap_or(Err(StepError::TimedOut(timeout.as_secs())))
            }
        }
    }
}

fn abort_reason(err: &StepError) -> String {
    match err {
        StepError::Cancelled(reason) => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChangeEvent, ChangeSnapshot, CiStatus};
    use crate::{scoring, strategy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::super::task::{PlanStep, StepKind};

    /// Counts calls and fails the test step until `test_failures` is used up.
    #[derive(Default)]
    struct ScriptedRunner {
        test_failures: AtomicU32,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn failing_tests(n: u32) -> Self {
            Self {
                test_failures: AtomicU32::new(n),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepRunner for ScriptedRunner {
        async fn analyze(&self, request: &ChangeEvent) -> Result<EvaluatedChange, StepError> {
            let snap = ChangeSnapshot::build(request).map_err(|e| StepError::Failed(e.to_string()))?;
            let assessment = scoring::score(&snap);
            let decision = strategy::decide(&assessment, &snap).unwrap();
            Ok(EvaluatedChange::new(snap, assessment, decision).unwrap())
        }

        async fn run_step(
            &self,
            _task_id: &str,
            step: &PlanStep,
            _analysis: &EvaluatedChange,
        ) -> Result<StepOutput, StepError> {
            self.calls.lock().unwrap().push(step.id.clone());
            if matches!(step.kind, StepKind::Test(_))
                && self
                    .test_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StepError::Failed("tests red".into()));
            }
            Ok(StepOutput::new(format!("{} ok", step.kind.name())))
        }
    }

    fn low_risk() -> ChangeEvent {
        ChangeEvent::new("abc", 3, 10, 5).with_ci(CiStatus::Pass)
    }

    #[tokio::test]
    async fn happy_path_completes() {
        let runner = Arc::new(ScriptedRunner::default());
        let agent = Agent::new(runner.clone(), AgentSettings::default());

        let report = agent.run(AgentTask::with_id("t1", low_risk())).await.unwrap();
        assert_eq!(report.final_state, AgentState::Completed);
        assert_eq!(report.rounds, 1);
        assert_eq!(
            runner.calls(),
            vec!["1-analyze", "2-scan", "3-test", "4-integrate"]
        );
        assert_eq!(report.transitions.len(), 5);
    }

    #[tokio::test]
    async fn failure_stops_remaining_steps_and_retry_skips_successes() {
        let runner = Arc::new(ScriptedRunner::failing_tests(1));
        let agent = Agent::new(runner.clone(), AgentSettings::default());

        let report = agent.run(AgentTask::with_id("t1", low_risk())).await.unwrap();
        assert_eq!(report.final_state, AgentState::Completed);
        assert_eq!(report.rounds, 2);
        assert_eq!(
            runner.calls(),
            vec!["1-analyze", "2-scan", "3-test", "3-test", "4-integrate"]
        );
        assert_eq!(report.steps[2].runs, 2);
        assert_eq!(report.steps[0].runs, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_the_failing_step() {
        let runner = Arc::new(ScriptedRunner::failing_tests(5));
        let agent = Agent::new(runner.clone(), AgentSettings::default());

        let report = agent.run(AgentTask::with_id("t1", low_risk())).await.unwrap();
        assert_eq!(report.final_state, AgentState::Failed);
        assert_eq!(report.rounds, 2);
        assert_eq!(report.failure_reason.as_deref(), Some("3-test: tests red"));
        assert_eq!(report.steps[3].status, StepStatus::Pending);
        assert!(!runner.calls().contains(&"4-integrate".to_string()));
    }

    #[tokio::test]
    async fn rerunning_a_task_uses_cached_steps() {
        let runner = Arc::new(ScriptedRunner::default());
        let agent = Agent::new(runner.clone(), AgentSettings::default());

        agent.run(AgentTask::with_id("t1", low_risk())).await.unwrap();
        let report = agent.run(AgentTask::with_id("t1", low_risk())).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(runner.calls().len(), 4);
        assert_eq!(agent.cache().len(), 4);
        assert!(report.steps.iter().all(|s| s.runs == 0));
    }

    #[tokio::test]
    async fn step_cache_keeps_only_recent_tasks() {
        let runner = Arc::new(ScriptedRunner::default());
        let settings = AgentSettings {
            cached_tasks: 2,
            ..AgentSettings::default()
        };
        let agent = Agent::new(runner.clone(), settings);

        for id in ["t1", "t2", "t3"] {
            agent.run(AgentTask::with_id(id, low_risk())).await.unwrap();
        }
        assert_eq!(agent.cache().task_count(), 2);
        assert!(agent.cache().get("t1", "1-analyze").is_none());
        assert!(agent.cache().get("t3", "4-integrate").is_some());

        agent.cache().evict("t3");
        assert_eq!(agent.cache().task_count(), 1);
        assert_eq!(agent.cache().len(), 4);
    }

    #[tokio::test]
    async fn malformed_request_aborts_during_analysis() {
        let agent = Agent::new(Arc::new(ScriptedRunner::default()), AgentSettings::default());
        let report = agent
            .run(AgentTask::with_id("t1", ChangeEvent::new("abc", -1, 0, 0)))
            .await
            .unwrap();
        assert_eq!(report.final_state, AgentState::Failed);
        assert!(report.decision.is_none());
        assert!(report.failure_reason.unwrap().contains("files_changed"));
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_as_superseded() {
        let runner = Arc::new(ScriptedRunner::default());
        let agent = Agent::new(runner.clone(), AgentSettings::default());
        let (tx, rx) = watch::channel(true);

        let report = agent
            .run_cancellable(AgentTask::with_id("t1", low_risk()), rx)
            .await
            .unwrap();
        drop(tx);
        assert_eq!(report.final_state, AgentState::Failed);
        assert_eq!(report.failure_reason.as_deref(), Some(SUPERSEDED_REASON));
        assert!(runner.calls().is_empty());
    }
}
