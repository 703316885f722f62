// Workflow lifecycle tests
// Drive jobs of every method through the state machine and check the recorded history.

use chrono::{Duration, Utc};
use std::sync::Arc;

use fabflow::{
    FabError, InMemoryJobStore, JobId, JobPriority, JobStore, ManufacturingJob, Method, Stage,
    WorkflowStateMachine,
};

fn workflow_with_store() -> (WorkflowStateMachine, Arc<InMemoryJobStore>) {
    let store = Arc::new(InMemoryJobStore::new());
    (WorkflowStateMachine::new(store.clone()), store)
}

fn job(method: Method, id: &str) -> ManufacturingJob {
    ManufacturingJob::new(method, "proc-001", "user-001", "bracket")
        .with_id(id)
        .with_model_url(format!("mem://{id}.stl"))
}

#[tokio::test]
async fn test_every_method_walks_its_full_table() {
    let (workflow, _) = workflow_with_store();

    for method in Method::ALL {
        let id = JobId::new(format!("{method}-walk"));
        let created = workflow.create(job(method, id.as_str())).await.unwrap();
        assert_eq!(created.current_stage, method.initial_stage());

        let mut visited = vec![created.current_stage];
        if method.requires_refined_geometry() {
            let job = workflow
                .receive_refined_geometry(&id, "mem://refined.step")
                .await
                .unwrap();
            visited.push(job.current_stage);
        }
        loop {
            let job = workflow.get(&id).await.unwrap();
            if job.is_terminal() {
                break;
            }
            let job = workflow.advance(&id, None).await.unwrap();
            visited.push(job.current_stage);
        }

        assert_eq!(visited, method.stages(), "{method}");
    }
}

#[tokio::test]
async fn test_timestamps_follow_fabrication_and_completion() {
    let (workflow, _) = workflow_with_store();
    let id = JobId::new("sls-times");
    workflow.create(job(Method::Sls, "sls-times")).await.unwrap();

    let printing = workflow.advance(&id, Some("Build started")).await.unwrap();
    assert_eq!(printing.current_stage, Stage::Printing);
    let started = printing.started_at.expect("started_at set on entering printing");
    assert!(printing.completed_at.is_none());

    workflow.advance(&id, None).await.unwrap();
    workflow.advance(&id, None).await.unwrap();
    let done = workflow.advance(&id, Some("Shipped")).await.unwrap();
    assert_eq!(done.current_stage, Stage::Completed);
    assert_eq!(done.started_at, Some(started));
    assert!(done.completed_at.unwrap() >= started);

    let texts: Vec<&str> = done.notes.iter().map(|note| note.text.as_str()).collect();
    assert_eq!(texts, vec!["Build started", "Shipped"]);
}

#[tokio::test]
async fn test_advance_at_terminal_stage_changes_nothing() {
    let (workflow, _) = workflow_with_store();
    let id = JobId::new("fdm-terminal");
    workflow.create(job(Method::Fdm, "fdm-terminal")).await.unwrap();
    workflow.advance(&id, None).await.unwrap();
    let completed = workflow.advance(&id, None).await.unwrap();

    let again = workflow.advance(&id, Some("ignored")).await.unwrap();
    assert_eq!(again, completed);

    let (workflow, _) = workflow_with_store();
    let id = JobId::new("cnc-cancelled");
    workflow.create(job(Method::Cnc, "cnc-cancelled")).await.unwrap();
    let cancelled = workflow.cancel(&id, "customer withdrew").await.unwrap();
    assert_eq!(cancelled.current_stage, Stage::Cancelled);
    assert_eq!(workflow.advance(&id, None).await.unwrap(), cancelled);
}

#[tokio::test]
async fn test_refined_geometry_only_accepted_while_awaiting() {
    let (workflow, _) = workflow_with_store();

    let fdm_id = JobId::new("fdm-step");
    workflow.create(job(Method::Fdm, "fdm-step")).await.unwrap();
    assert!(matches!(
        workflow.receive_refined_geometry(&fdm_id, "mem://x.step").await,
        Err(FabError::InvalidTransition { .. })
    ));

    let cfc_id = JobId::new("cfc-step");
    workflow.create(job(Method::Cfc, "cfc-step")).await.unwrap();
    let received = workflow
        .receive_refined_geometry(&cfc_id, "mem://cfc.step")
        .await
        .unwrap();
    assert_eq!(received.current_stage, Stage::StepReceived);
    assert_eq!(received.refined_geometry_url.as_deref(), Some("mem://cfc.step"));
    assert_eq!(received.source_artifact(), Some("mem://cfc.step"));

    assert!(matches!(
        workflow.receive_refined_geometry(&cfc_id, "mem://again.step").await,
        Err(FabError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_cancel_is_refused_once_fabrication_started() {
    let (workflow, _) = workflow_with_store();
    let id = JobId::new("fdm-late-cancel");
    workflow.create(job(Method::Fdm, "fdm-late-cancel")).await.unwrap();
    workflow.advance(&id, None).await.unwrap();

    let err = workflow.cancel(&id, "too late").await.unwrap_err();
    assert!(matches!(err, FabError::InvalidTransition { .. }));
    assert_eq!(workflow.get(&id).await.unwrap().current_stage, Stage::Printing);
}

#[tokio::test]
async fn test_mark_failed_from_any_active_stage() {
    let (workflow, _) = workflow_with_store();
    let id = JobId::new("cnc-fail");
    workflow.create(job(Method::Cnc, "cnc-fail")).await.unwrap();
    workflow
        .receive_refined_geometry(&id, "mem://cnc.step")
        .await
        .unwrap();

    let failed = workflow.mark_failed(&id, "stock cracked").await.unwrap();
    assert_eq!(failed.current_stage, Stage::Failed);
    assert!(failed.notes.last().unwrap().text.contains("stock cracked"));

    assert!(workflow.mark_failed(&id, "twice").await.is_err());
    assert!(workflow.cancel(&id, "after failure").await.is_err());
}

#[tokio::test]
async fn test_unknown_and_duplicate_jobs() {
    let (workflow, _) = workflow_with_store();
    let missing = workflow.advance(&JobId::new("nope"), None).await.unwrap_err();
    assert!(matches!(missing, FabError::NotFound { kind: "job", .. }));

    workflow.create(job(Method::Sls, "sls-dup")).await.unwrap();
    let duplicate = workflow.create(job(Method::Sls, "sls-dup")).await.unwrap_err();
    assert!(matches!(duplicate, FabError::Validation(_)));
}

#[tokio::test]
async fn test_stored_job_outside_its_table_is_an_invariant_violation() {
    let (workflow, store) = workflow_with_store();
    let mut corrupt = job(Method::Fdm, "fdm-corrupt");
    corrupt.current_stage = Stage::Depowdering;
    store.save(&corrupt).await.unwrap();

    let err = workflow.get(&JobId::new("fdm-corrupt")).await.unwrap_err();
    assert!(matches!(err, FabError::InvariantViolation(_)));
    assert!(workflow
        .advance(&JobId::new("fdm-corrupt"), None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_next_eligible_prefers_priority_then_age() {
    let (workflow, _) = workflow_with_store();
    let now = Utc::now();

    workflow
        .create_at(job(Method::Fdm, "fdm-old-normal"), now - Duration::hours(5))
        .await
        .unwrap();
    workflow
        .create_at(
            job(Method::Fdm, "fdm-new-high").with_priority(JobPriority::High),
            now - Duration::hours(1),
        )
        .await
        .unwrap();
    workflow
        .create_at(
            job(Method::Fdm, "fdm-old-high").with_priority(JobPriority::High),
            now - Duration::hours(3),
        )
        .await
        .unwrap();
    workflow
        .create_at(
            job(Method::Sls, "sls-urgent").with_priority(JobPriority::Urgent),
            now - Duration::hours(9),
        )
        .await
        .unwrap();

    let next = workflow.next_eligible(Method::Fdm).await.unwrap().unwrap();
    assert_eq!(next.job_id.as_str(), "fdm-old-high");

    // CFC jobs are not eligible until planning
    workflow.create(job(Method::Cfc, "cfc-waiting")).await.unwrap();
    assert!(workflow.next_eligible(Method::Cfc).await.unwrap().is_none());
}

#[tokio::test]
async fn test_queue_summary_counts_every_stage() {
    let (workflow, _) = workflow_with_store();
    let now = Utc::now();

    workflow
        .create_at(job(Method::Fdm, "fdm-a"), now - Duration::hours(2))
        .await
        .unwrap();
    workflow
        .create_at(job(Method::Fdm, "fdm-b"), now - Duration::hours(4))
        .await
        .unwrap();
    workflow
        .create_at(job(Method::Fdm, "fdm-c"), now - Duration::hours(6))
        .await
        .unwrap();
    workflow.advance(&JobId::new("fdm-a"), None).await.unwrap();
    workflow
        .cancel(&JobId::new("fdm-c"), "duplicate order")
        .await
        .unwrap();

    let summary = workflow.queue_summary_at(now).await.unwrap();
    let fdm = &summary.methods[&Method::Fdm];
    assert_eq!(fdm.total_jobs, 3);
    assert_eq!(fdm.cancelled, 1);
    assert_eq!(fdm.failed, 0);

    let counts: Vec<(Stage, usize)> = fdm.stages.iter().map(|s| (s.stage, s.count)).collect();
    assert_eq!(
        counts,
        vec![(Stage::Queued, 1), (Stage::Printing, 1), (Stage::Completed, 0)]
    );
    let mean = fdm.mean_age_hours.unwrap();
    assert!((mean - 3.0).abs() < 1e-6, "{mean}");

    let cnc = &summary.methods[&Method::Cnc];
    assert_eq!(cnc.total_jobs, 0);
    assert!(cnc.mean_age_hours.is_none());
    assert_eq!(summary.methods.len(), 4);
}
