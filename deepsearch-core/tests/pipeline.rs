//! End-to-end pipeline scenarios over mock providers: event ordering,
//! provider fallback, iteration budget, cancellation, and degraded
//! reporting.

use deepsearch_core::providers::{LlmProvider, MockLlmProvider, ModelRouter};
use deepsearch_core::search::MockSearchProvider;
use deepsearch_core::types::ProviderId;
use deepsearch_core::{
    ConfigError, EngineError, Event, EventKind, Orchestrator, ProviderError, SessionConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn plan_json(questions: &[&str]) -> String {
    serde_json::to_string(&serde_json::json!({
        "objective": "test objective",
        "sub_questions": questions,
    }))
    .unwrap()
}

fn router_with(providers: Vec<(&str, Arc<MockLlmProvider>)>) -> Arc<ModelRouter> {
    Arc::new(ModelRouter::new(
        providers
            .into_iter()
            .map(|(id, p)| (ProviderId::new(id), p as Arc<dyn LlmProvider>))
            .collect(),
    ))
}

fn config_for(providers: &[&str]) -> SessionConfig {
    SessionConfig {
        provider_order: providers.iter().map(|p| ProviderId::new(*p)).collect(),
        queries_per_iteration: 5,
        max_iterations: 3,
        ..SessionConfig::default()
    }
}

fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind == kind).count()
}

fn assert_gapless_single_terminal(events: &[Event]) {
    assert!(!events.is_empty());
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, i as u64 + 1, "sequence gap at index {i}");
    }
    let terminals = events.iter().filter(|e| e.kind.is_terminal()).count();
    assert_eq!(terminals, 1, "exactly one terminal event expected");
    assert!(events.last().unwrap().kind.is_terminal());
    assert_eq!(events[0].kind, EventKind::SessionStarted);
}

#[tokio::test]
async fn happy_path_emits_ordered_stream() {
    let llm = Arc::new(MockLlmProvider::with_response("# Research Report\n\nfindings."));
    llm.queue_text(&plan_json(&["q1", "q2", "q3", "q4", "q5"]));
    llm.queue_text("SUFFICIENT");

    let engine = Orchestrator::new(
        router_with(vec![("primary", llm)]),
        Arc::new(MockSearchProvider::new(3)),
    );
    let (_handle, stream) = engine.start("test goal", config_for(&["primary"])).unwrap();
    let events = stream.collect().await;

    assert_gapless_single_terminal(&events);
    assert_eq!(events.last().unwrap().kind, EventKind::Done);
    assert_eq!(count(&events, EventKind::PlanReady), 1);
    assert_eq!(count(&events, EventKind::QueryIssued), 5);
    assert_eq!(count(&events, EventKind::ResultReceived), 5);
    assert_eq!(count(&events, EventKind::FindingAdded), 5);
    assert_eq!(count(&events, EventKind::SearchFailed), 0);
    assert!(count(&events, EventKind::ReportChunk) >= 1);

    let done = events.last().unwrap();
    assert_eq!(done.payload["iterations"], 1);
    assert_eq!(done.payload["degraded"], false);
    assert!(done.payload["finding_count"].as_u64().unwrap() >= 1);

    // plan_ready precedes the first query_issued.
    let plan_seq = events
        .iter()
        .find(|e| e.kind == EventKind::PlanReady)
        .unwrap()
        .sequence;
    let first_query_seq = events
        .iter()
        .find(|e| e.kind == EventKind::QueryIssued)
        .unwrap()
        .sequence;
    assert!(plan_seq < first_query_seq);
}

#[tokio::test]
async fn transient_primary_failure_falls_back_once() {
    let failing = Arc::new(MockLlmProvider::always_failing(ProviderError::Connection {
        message: "connection refused".into(),
    }));
    let backup = Arc::new(MockLlmProvider::with_response("# Report from backup"));
    backup.queue_text(&plan_json(&["q1", "q2"]));
    backup.queue_text("SUFFICIENT");

    let engine = Orchestrator::new(
        router_with(vec![("primary", failing.clone()), ("backup", backup)]),
        Arc::new(MockSearchProvider::new(2)),
    );
    let (_handle, stream) = engine
        .start("test goal", config_for(&["primary", "backup"]))
        .unwrap();
    let events = stream.collect().await;

    assert_gapless_single_terminal(&events);
    assert_eq!(events.last().unwrap().kind, EventKind::Done);

    // The cursor sticks to the backup after the planning fallback, so
    // reflection and reporting never retry the dead primary.
    assert_eq!(count(&events, EventKind::ModelFallback), 1);
    assert_eq!(failing.call_count(), 1);

    let fallback = events
        .iter()
        .find(|e| e.kind == EventKind::ModelFallback)
        .unwrap();
    assert_eq!(fallback.payload["from"], "primary");
    assert_eq!(fallback.payload["to"], "backup");
    assert_eq!(fallback.payload["stage"], "planning");

    assert!(count(&events, EventKind::QueryIssued) >= 1);
    assert!(count(&events, EventKind::ResultReceived) >= 1);
    let report: String = events
        .iter()
        .filter(|e| e.kind == EventKind::ReportChunk)
        .map(|e| e.payload["text"].as_str().unwrap().to_string())
        .collect();
    assert!(report.contains("Report from backup"));
}

#[tokio::test]
async fn exhausted_iterations_force_progression() {
    // Reflection never reports sufficiency; the iteration budget must
    // push the session into reporting anyway.
    let llm = Arc::new(MockLlmProvider::with_response("CONTINUE"));
    llm.queue_text(&plan_json(&["q1", "q2", "q3", "q4", "q5", "q6"]));

    let config = SessionConfig {
        max_iterations: 2,
        queries_per_iteration: 3,
        ..config_for(&["primary"])
    };
    let engine = Orchestrator::new(
        router_with(vec![("primary", llm)]),
        Arc::new(MockSearchProvider::new(2)),
    );
    let (_handle, stream) = engine.start("test goal", config).unwrap();
    let events = stream.collect().await;

    assert_gapless_single_terminal(&events);
    assert_eq!(events.last().unwrap().kind, EventKind::Done);
    assert_eq!(count(&events, EventKind::BudgetExhausted), 1);
    assert_eq!(count(&events, EventKind::ReflectionVerdict), 2);
    assert_eq!(events.last().unwrap().payload["iterations"], 2);

    let exhausted = events
        .iter()
        .find(|e| e.kind == EventKind::BudgetExhausted)
        .unwrap();
    assert_eq!(exhausted.payload["iterations"], 2);
}

#[tokio::test]
async fn replan_produces_second_plan() {
    let llm = Arc::new(MockLlmProvider::with_response("# Report"));
    llm.queue_text(&plan_json(&["q1", "q2"]));
    llm.queue_text("REPLAN");
    llm.queue_text(&plan_json(&["better q1", "better q2"]));
    llm.queue_text("SUFFICIENT");

    let engine = Orchestrator::new(
        router_with(vec![("primary", llm)]),
        Arc::new(MockSearchProvider::new(2)),
    );
    let (_handle, stream) = engine.start("test goal", config_for(&["primary"])).unwrap();
    let events = stream.collect().await;

    assert_gapless_single_terminal(&events);
    assert_eq!(events.last().unwrap().kind, EventKind::Done);

    let plans: Vec<&Event> = events
        .iter()
        .filter(|e| e.kind == EventKind::PlanReady)
        .collect();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].payload["replan"], false);
    assert_eq!(plans[1].payload["replan"], true);
    assert_eq!(events.last().unwrap().payload["replans"], 1);

    // The second iteration issues queries from the new plan.
    let second_iteration_query = events
        .iter()
        .find(|e| e.kind == EventKind::QueryIssued && e.payload["iteration"] == 2)
        .unwrap();
    assert!(second_iteration_query.payload["query"]
        .as_str()
        .unwrap()
        .starts_with("better"));
}

#[tokio::test]
async fn denied_replan_forces_progression() {
    // Reflection keeps demanding a new plan but the replan budget is
    // zero; the session must move on to reporting after the first
    // denial instead of burning the remaining iterations.
    let llm = Arc::new(MockLlmProvider::with_response("REPLAN"));
    llm.queue_text(&plan_json(&["q1", "q2"]));

    let config = SessionConfig {
        max_replans: 0,
        max_iterations: 3,
        ..config_for(&["primary"])
    };
    let engine = Orchestrator::new(
        router_with(vec![("primary", llm)]),
        Arc::new(MockSearchProvider::new(2)),
    );
    let (_handle, stream) = engine.start("test goal", config).unwrap();
    let events = stream.collect().await;

    assert_gapless_single_terminal(&events);
    assert_eq!(events.last().unwrap().kind, EventKind::Done);
    assert_eq!(count(&events, EventKind::ReflectionVerdict), 1);
    assert_eq!(count(&events, EventKind::PlanReady), 1);
    assert_eq!(count(&events, EventKind::BudgetExhausted), 1);
    assert_eq!(events.last().unwrap().payload["iterations"], 1);

    let exhausted = events
        .iter()
        .find(|e| e.kind == EventKind::BudgetExhausted)
        .unwrap();
    assert_eq!(exhausted.payload["verdict"], "replan");
    assert_eq!(exhausted.payload["replans"], 0);
}

#[tokio::test]
async fn cancellation_during_search_wins() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_text(&plan_json(&["q1", "q2", "q3"]));

    let search = Arc::new(MockSearchProvider::new(2).with_delay(Duration::from_secs(30)));
    let engine = Orchestrator::new(router_with(vec![("primary", llm.clone())]), search);
    let (handle, mut stream) = engine.start("test goal", config_for(&["primary"])).unwrap();

    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        if event.kind == EventKind::PhaseStarted && event.payload["phase"] == "searching" {
            handle.cancel();
        }
        events.push(event);
    }

    assert_gapless_single_terminal(&events);
    let terminal = events.last().unwrap();
    assert_eq!(terminal.kind, EventKind::Cancelled);
    assert_eq!(terminal.payload["phase"], "searching");
    assert_eq!(terminal.payload["finding_count"], 0);
    assert_eq!(count(&events, EventKind::FindingAdded), 0);

    // Only the planning completion ran; no calls after cancellation.
    assert_eq!(llm.call_count(), 1);
    assert_eq!(engine.active_sessions(), 0);
}

#[tokio::test]
async fn cancel_by_id_is_equivalent_and_idempotent() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_text(&plan_json(&["q1"]));

    let search = Arc::new(MockSearchProvider::new(2).with_delay(Duration::from_secs(30)));
    let engine = Orchestrator::new(router_with(vec![("primary", llm)]), search);
    let (handle, mut stream) = engine.start("test goal", config_for(&["primary"])).unwrap();

    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        if event.kind == EventKind::PhaseStarted && event.payload["phase"] == "searching" {
            engine.cancel(handle.id());
            engine.cancel(handle.id());
        }
        events.push(event);
    }
    assert_eq!(events.last().unwrap().kind, EventKind::Cancelled);
}

#[tokio::test]
async fn per_query_failures_do_not_stop_the_iteration() {
    let llm = Arc::new(MockLlmProvider::with_response("# Report"));
    llm.queue_text(&plan_json(&["q1", "FAIL q2", "q3", "FAIL q4", "q5"]));
    llm.queue_text("SUFFICIENT");

    let search = Arc::new(MockSearchProvider::new(2).fail_queries_containing("FAIL"));
    let engine = Orchestrator::new(router_with(vec![("primary", llm)]), search);
    let (_handle, stream) = engine.start("test goal", config_for(&["primary"])).unwrap();
    let events = stream.collect().await;

    assert_gapless_single_terminal(&events);
    assert_eq!(events.last().unwrap().kind, EventKind::Done);
    assert_eq!(count(&events, EventKind::SearchFailed), 2);
    assert_eq!(count(&events, EventKind::ResultReceived), 3);
    assert_eq!(count(&events, EventKind::FindingAdded), 3);
    // The iteration still reached reflection.
    assert!(count(&events, EventKind::ReflectionVerdict) >= 1);
}

#[tokio::test]
async fn report_failure_flushes_degraded_report() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_text(&plan_json(&["q1", "q2"]));
    llm.queue_text("SUFFICIENT");
    llm.queue_error(ProviderError::Server {
        status: 503,
        message: "overloaded".into(),
    });

    let engine = Orchestrator::new(
        router_with(vec![("primary", llm)]),
        Arc::new(MockSearchProvider::new(2)),
    );
    let (_handle, stream) = engine.start("test goal", config_for(&["primary"])).unwrap();
    let events = stream.collect().await;

    assert_gapless_single_terminal(&events);
    let done = events.last().unwrap();
    assert_eq!(done.kind, EventKind::Done);
    assert_eq!(done.payload["degraded"], true);

    // The degraded body carries the gathered findings.
    let report: String = events
        .iter()
        .filter(|e| e.kind == EventKind::ReportChunk)
        .map(|e| e.payload["text"].as_str().unwrap().to_string())
        .collect();
    assert!(report.contains("Key findings"));
    assert!(report.contains("Snippet 1 about q1"));
}

#[tokio::test]
async fn report_failure_without_degraded_fallback_fails_session() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_text(&plan_json(&["q1"]));
    llm.queue_text("SUFFICIENT");
    llm.queue_error(ProviderError::Server {
        status: 503,
        message: "overloaded".into(),
    });

    let config = SessionConfig {
        degraded_report: false,
        ..config_for(&["primary"])
    };
    let engine = Orchestrator::new(
        router_with(vec![("primary", llm)]),
        Arc::new(MockSearchProvider::new(2)),
    );
    let (_handle, stream) = engine.start("test goal", config).unwrap();
    let events = stream.collect().await;

    assert_gapless_single_terminal(&events);
    let terminal = events.last().unwrap();
    assert_eq!(terminal.kind, EventKind::Error);
    // A single provider failing transiently exhausts the order.
    assert_eq!(terminal.payload["kind"], "provider_exhausted");
    assert_eq!(count(&events, EventKind::ReportChunk), 0);
}

#[tokio::test]
async fn unparseable_plan_falls_back_to_default_queries() {
    let llm = Arc::new(MockLlmProvider::with_response("# Report"));
    llm.queue_text("I cannot produce JSON today.");
    llm.queue_text("SUFFICIENT");

    let engine = Orchestrator::new(
        router_with(vec![("primary", llm)]),
        Arc::new(MockSearchProvider::new(2)),
    );
    let (_handle, stream) = engine.start("solid state batteries", config_for(&["primary"])).unwrap();
    let events = stream.collect().await;

    assert_eq!(events.last().unwrap().kind, EventKind::Done);
    // Default plan supplies five angles on the goal.
    assert_eq!(count(&events, EventKind::QueryIssued), 5);
    let first_query = events
        .iter()
        .find(|e| e.kind == EventKind::QueryIssued)
        .unwrap();
    assert!(first_query.payload["query"]
        .as_str()
        .unwrap()
        .contains("solid state batteries"));
}

#[tokio::test]
async fn start_rejects_bad_configuration_synchronously() {
    let engine = Orchestrator::new(
        router_with(vec![("primary", Arc::new(MockLlmProvider::new()))]),
        Arc::new(MockSearchProvider::new(2)),
    );

    let no_providers = SessionConfig::default();
    assert!(matches!(
        engine.start("goal", no_providers),
        Err(EngineError::Config(ConfigError::MissingField { .. }))
    ));

    let unknown = config_for(&["missing"]);
    assert!(matches!(
        engine.start("goal", unknown),
        Err(EngineError::Config(ConfigError::UnknownProvider { .. }))
    ));

    let zero_iterations = SessionConfig {
        max_iterations: 0,
        ..config_for(&["primary"])
    };
    assert!(engine.start("goal", zero_iterations).is_err());
    assert_eq!(engine.active_sessions(), 0);
}

#[tokio::test]
async fn duplicate_findings_are_collapsed_before_reporting() {
    // Two identical queries produce identical claims from the mock
    // search provider, which enhancement collapses.
    let llm = Arc::new(MockLlmProvider::with_response("# Report"));
    llm.queue_text(&plan_json(&["same question", "same question"]));
    llm.queue_text("SUFFICIENT");

    let engine = Orchestrator::new(
        router_with(vec![("primary", llm)]),
        Arc::new(MockSearchProvider::new(2)),
    );
    let (_handle, stream) = engine.start("test goal", config_for(&["primary"])).unwrap();
    let events = stream.collect().await;

    assert_eq!(events.last().unwrap().kind, EventKind::Done);
    let enhancement = events
        .iter()
        .find(|e| e.kind == EventKind::EnhancementApplied)
        .unwrap();
    assert_eq!(enhancement.payload["removed_duplicates"], 1);
    assert_eq!(enhancement.payload["retained"], 1);
    // The session's own findings stay untouched.
    assert_eq!(events.last().unwrap().payload["finding_count"], 1);
}
