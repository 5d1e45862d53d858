//! Session orchestration.
//!
//! The [`Orchestrator`] is the engine's public entry point: it
//! validates configuration, registers the session, and spawns the
//! session task that drives the phase machine to a terminal state. All
//! provider calls go through the orchestrator so fallback events keep
//! their place in the session's event order.
//!
//! Cancellation is cooperative and wins races: once the token fires,
//! the next await point surfaces `Cancelled`, and a provider failure
//! observed concurrently is reported as cancellation, not as an error.

use crate::config::SessionConfig;
use crate::error::{ConfigError, EngineError, GenerationError};
use crate::event::{self, EventEmitter, EventKind, EventStream};
use crate::executor::SearchExecutor;
use crate::planner::{Plan, QueryPlanner};
use crate::providers::{ModelRouter, RoutedCompletion, RouterCursor};
use crate::reflect::{ReflectionEvaluator, ReflectionVerdict};
use crate::report::{ReportGenerator, ResearchReport};
use crate::search::SearchProvider;
use crate::session::{Session, SessionPhase};
use crate::types::CompletionRequest;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

type SessionRegistry = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.session_id
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Engine entry point. Cheap to clone; sessions run independently.
#[derive(Clone)]
pub struct Orchestrator {
    router: Arc<ModelRouter>,
    search: Arc<dyn SearchProvider>,
    planner: QueryPlanner,
    executor: SearchExecutor,
    evaluator: ReflectionEvaluator,
    enhancer: crate::enhance::QualityEnhancer,
    reporter: ReportGenerator,
    sessions: SessionRegistry,
}

impl Orchestrator {
    pub fn new(router: Arc<ModelRouter>, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            router,
            search,
            planner: QueryPlanner::new(),
            executor: SearchExecutor::new(),
            evaluator: ReflectionEvaluator::new(),
            enhancer: crate::enhance::QualityEnhancer::new(),
            reporter: ReportGenerator::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a research session.
    ///
    /// Configuration problems are rejected here, synchronously, before
    /// any session state exists or any event is emitted. On success the
    /// session task is spawned and its events flow through the returned
    /// stream until exactly one terminal event.
    pub fn start(
        &self,
        goal: &str,
        config: SessionConfig,
    ) -> Result<(SessionHandle, EventStream), EngineError> {
        config.validate()?;
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(ConfigError::Invalid {
                message: "research goal must not be empty".into(),
            }
            .into());
        }
        let cursor = self.router.session_cursor(&config.provider_order)?;

        let session = Session::new(goal, config.max_iterations);
        let (emitter, stream) = event::channel(session.id, config.event_buffer.clone());
        let cancel = CancellationToken::new();
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .insert(session.id, cancel.clone());

        let handle = SessionHandle {
            session_id: session.id,
            cancel: cancel.clone(),
        };
        info!(session_id = %session.id, goal, "Starting research session");

        let runner = SessionRunner {
            session,
            config,
            cursor,
            cancel,
            emitter,
            router: self.router.clone(),
            search: self.search.clone(),
            planner: self.planner.clone(),
            executor: self.executor.clone(),
            evaluator: self.evaluator.clone(),
            enhancer: self.enhancer.clone(),
            reporter: self.reporter.clone(),
            sessions: self.sessions.clone(),
        };
        tokio::spawn(runner.run());

        Ok((handle, stream))
    }

    /// Cancel a session by id. Unknown or already finished ids are a
    /// no-op, so callers can cancel without tracking session lifetime.
    pub fn cancel(&self, session_id: Uuid) {
        if let Some(token) = self
            .sessions
            .lock()
            .expect("session registry lock poisoned")
            .get(&session_id)
        {
            token.cancel();
        }
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .len()
    }
}

/// Owns one session's state and drives it to a terminal phase.
struct SessionRunner {
    session: Session,
    config: SessionConfig,
    cursor: RouterCursor,
    cancel: CancellationToken,
    emitter: EventEmitter,
    router: Arc<ModelRouter>,
    search: Arc<dyn SearchProvider>,
    planner: QueryPlanner,
    executor: SearchExecutor,
    evaluator: ReflectionEvaluator,
    enhancer: crate::enhance::QualityEnhancer,
    reporter: ReportGenerator,
    sessions: SessionRegistry,
}

impl SessionRunner {
    async fn run(mut self) {
        let started = Instant::now();
        self.emitter
            .emit(
                EventKind::SessionStarted,
                json!({
                    "goal": self.session.goal,
                    "max_iterations": self.config.max_iterations,
                    "provider_order": self.config.provider_order,
                }),
            )
            .await;

        match self.drive().await {
            Ok(report) => {
                self.session.transition(SessionPhase::Done);
                info!(
                    session_id = %self.session.id,
                    findings = report.finding_count,
                    iterations = self.session.iteration,
                    "Session completed"
                );
                self.emitter
                    .emit(
                        EventKind::Done,
                        json!({
                            "finding_count": report.finding_count,
                            "source_count": report.source_count,
                            "iterations": self.session.iteration,
                            "replans": self.session.replans,
                            "degraded": report.degraded,
                            "elapsed_ms": started.elapsed().as_millis() as u64,
                        }),
                    )
                    .await;
            }
            Err(EngineError::Cancelled) => {
                let phase = self.session.phase;
                self.session.transition(SessionPhase::Cancelled);
                info!(session_id = %self.session.id, %phase, "Session cancelled");
                self.emitter
                    .emit(
                        EventKind::Cancelled,
                        json!({
                            "phase": phase,
                            "iterations": self.session.iteration,
                            "finding_count": self.session.findings.len(),
                        }),
                    )
                    .await;
            }
            Err(error) => {
                self.session.transition(SessionPhase::Failed);
                warn!(session_id = %self.session.id, %error, "Session failed");
                self.emitter
                    .emit(
                        EventKind::Error,
                        json!({
                            "kind": error.kind(),
                            "message": error.to_string(),
                            "iterations": self.session.iteration,
                            "finding_count": self.session.findings.len(),
                        }),
                    )
                    .await;
            }
        }

        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .remove(&self.session.id);
    }

    async fn drive(&mut self) -> Result<ResearchReport, EngineError> {
        let mut plan = self.plan_phase().await?;
        // Slicing position within the current plan; restarts on re-plan
        // while the session iteration keeps counting against the budget.
        let mut plan_iteration = 0usize;

        loop {
            // Querying
            self.session.iteration += 1;
            plan_iteration += 1;
            let iteration = self.session.iteration;
            self.enter_phase(SessionPhase::Querying).await?;
            let queries = self.planner.queries_for_iteration(
                &plan,
                plan_iteration,
                self.config.queries_per_iteration,
            );
            for query in &queries {
                self.emitter
                    .emit(
                        EventKind::QueryIssued,
                        json!({
                            "query_id": query.id,
                            "query": query.text,
                            "iteration": iteration,
                        }),
                    )
                    .await;
            }
            self.complete_phase(SessionPhase::Querying, json!({ "query_count": queries.len() }))
                .await;

            // Searching
            self.enter_phase(SessionPhase::Searching).await?;
            let stats = self
                .executor
                .execute(
                    self.search.clone(),
                    &queries,
                    self.config.results_per_query,
                    self.config.search_timeout(),
                    &self.cancel,
                    &mut self.session,
                    &mut self.emitter,
                )
                .await?;
            self.complete_phase(
                SessionPhase::Searching,
                json!({
                    "succeeded": stats.succeeded,
                    "failed": stats.failed,
                    "findings_added": stats.findings_added,
                }),
            )
            .await;

            // Reflecting
            self.enter_phase(SessionPhase::Reflecting).await?;
            let prompt = self.evaluator.prompt(
                &self.session.goal,
                &plan,
                &self.session.findings,
                iteration,
                self.config.max_iterations,
            );
            let routed = self
                .complete(
                    "reflecting",
                    CompletionRequest::new(prompt).with_temperature(0.2),
                )
                .await?;
            let verdict = self.evaluator.parse_verdict(&routed.text);
            self.emitter
                .emit(
                    EventKind::ReflectionVerdict,
                    json!({ "verdict": verdict, "iteration": iteration }),
                )
                .await;
            self.complete_phase(SessionPhase::Reflecting, json!({ "verdict": verdict }))
                .await;

            // A verdict the budget cannot honor forces progression to
            // Enhancing, with budget_exhausted marking the forced move.
            match verdict {
                ReflectionVerdict::Sufficient => break,
                ReflectionVerdict::Replan
                    if self.session.replans < self.config.max_replans
                        && iteration < self.config.max_iterations =>
                {
                    self.session.replans += 1;
                    plan = self.plan_phase().await?;
                    plan_iteration = 0;
                }
                ReflectionVerdict::Replan => {
                    self.emitter
                        .emit(
                            EventKind::BudgetExhausted,
                            json!({
                                "iterations": iteration,
                                "replans": self.session.replans,
                                "verdict": verdict,
                                "finding_count": self.session.findings.len(),
                            }),
                        )
                        .await;
                    break;
                }
                ReflectionVerdict::ContinueSearch => {
                    if iteration >= self.config.max_iterations {
                        self.emitter
                            .emit(
                                EventKind::BudgetExhausted,
                                json!({
                                    "iterations": iteration,
                                    "replans": self.session.replans,
                                    "verdict": verdict,
                                    "finding_count": self.session.findings.len(),
                                }),
                            )
                            .await;
                        break;
                    }
                }
            }
        }

        // Enhancing
        self.enter_phase(SessionPhase::Enhancing).await?;
        let (enhanced, summary) = self.enhancer.enhance(&self.session.findings);
        self.emitter
            .emit(
                EventKind::EnhancementApplied,
                json!({
                    "removed_duplicates": summary.removed_duplicates,
                    "contradictions": summary.contradictions,
                    "retained": summary.retained,
                }),
            )
            .await;
        self.complete_phase(
            SessionPhase::Enhancing,
            json!({ "retained": summary.retained }),
        )
        .await;

        // Reporting
        self.enter_phase(SessionPhase::Reporting).await?;
        let goal = self.session.goal.clone();
        let prompt = self.reporter.prompt(&goal, &enhanced);
        let report = match self
            .complete(
                "reporting",
                CompletionRequest::new(prompt).with_max_tokens(4096),
            )
            .await
        {
            Ok(routed) => self.reporter.from_completion(&goal, &routed.text, &enhanced),
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(error) if self.config.degraded_report => {
                warn!(session_id = %self.session.id, %error, "Report generation failed, flushing findings");
                self.reporter.degraded(&goal, &enhanced)
            }
            Err(error) => return Err(error),
        };

        let chunks = self.reporter.chunks(&report.body);
        let total_chunks = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            self.emitter
                .emit(
                    EventKind::ReportChunk,
                    json!({
                        "index": index,
                        "total": total_chunks,
                        "text": chunk,
                        "degraded": report.degraded,
                    }),
                )
                .await;
        }
        self.complete_phase(
            SessionPhase::Reporting,
            json!({ "degraded": report.degraded, "chunks": total_chunks }),
        )
        .await;

        Ok(report)
    }

    async fn plan_phase(&mut self) -> Result<Plan, EngineError> {
        self.enter_phase(SessionPhase::Planning).await?;
        let prompt = self
            .planner
            .plan_prompt(&self.session.goal, &self.session.findings);
        let routed = self
            .complete(
                "planning",
                CompletionRequest::new(prompt).with_temperature(0.4),
            )
            .await?;
        let plan = self.planner.parse_plan(&self.session.goal, &routed.text);
        self.emitter
            .emit(
                EventKind::PlanReady,
                json!({
                    "objective": plan.objective,
                    "sub_questions": plan.sub_questions,
                    "provider": routed.provider,
                    "replan": self.session.replans > 0,
                }),
            )
            .await;
        self.complete_phase(
            SessionPhase::Planning,
            json!({ "sub_question_count": plan.sub_questions.len() }),
        )
        .await;
        Ok(plan)
    }

    /// Transition into a phase and emit `phase_started`. Surfaces
    /// cancellation so a cancelled session never enters another phase.
    async fn enter_phase(&mut self, phase: SessionPhase) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.session.transition(phase);
        self.emitter
            .emit(
                EventKind::PhaseStarted,
                json!({
                    "phase": phase,
                    "iteration": self.session.iteration,
                    "progress": self.session.progress,
                }),
            )
            .await;
        Ok(())
    }

    async fn complete_phase(&mut self, phase: SessionPhase, detail: serde_json::Value) {
        self.emitter
            .emit(
                EventKind::PhaseCompleted,
                json!({ "phase": phase, "detail": detail }),
            )
            .await;
    }

    /// One routed completion with cancellation racing the call.
    ///
    /// Fallback hops taken on the way to success are emitted here, in
    /// order, so they land in the stream before any event derived from
    /// the completion. A failure observed after the token fired is
    /// reported as cancellation.
    async fn complete(
        &mut self,
        stage: &'static str,
        request: CompletionRequest,
    ) -> Result<RoutedCompletion, EngineError> {
        let cancel = self.cancel.clone();
        let timeout = self.config.model_timeout();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            outcome = self.router.complete(&mut self.cursor, request, timeout) => outcome,
        };

        match outcome {
            Ok(routed) => {
                for hop in &routed.fallbacks {
                    self.emitter
                        .emit(
                            EventKind::ModelFallback,
                            json!({
                                "stage": stage,
                                "from": hop.from,
                                "to": hop.to,
                                "reason": hop.reason,
                            }),
                        )
                        .await;
                }
                Ok(routed)
            }
            Err(error) => {
                if self.cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                Err(GenerationError::provider(stage, error).into())
            }
        }
    }
}
