// Property-based tests for dispatch ordering, workflow progress and recommendation bounds
// Invariants are checked over generated jobs, operation sequences and part geometries.

use chrono::{Duration, Utc};
use proptest::prelude::*;
use proptest::test_runner::{Config, TestCaseError, TestCaseResult, TestRunner};
use proptest_derive::Arbitrary;
use std::collections::HashSet;
use std::sync::Arc;

use fabflow::recommendation::profile;
use fabflow::{
    DispatchOutcome, DispatchSettings, FleetDispatcher, FleetRegistry, GeometryFeatureSet,
    InMemoryArtifactStore, InMemoryJobStore, JobId, JobPriority, JobQueue, MachineSpec,
    ManufacturingJob, Method, RecommendationEngine, SimulatedMachine, Stage, SurfaceFinish,
    Tolerance, Vendor, WorkflowStateMachine,
};

fn method_strategy() -> impl Strategy<Value = Method> {
    prop::sample::select(Method::ALL.to_vec())
}

fn priority_strategy() -> impl Strategy<Value = JobPriority> {
    prop::sample::select(JobPriority::ALL.to_vec())
}

fn finish_strategy() -> impl Strategy<Value = SurfaceFinish> {
    prop::sample::select(vec![
        SurfaceFinish::Low,
        SurfaceFinish::Medium,
        SurfaceFinish::High,
    ])
}

fn tolerance_strategy() -> impl Strategy<Value = Tolerance> {
    prop::sample::select(vec![Tolerance::Loose, Tolerance::Standard, Tolerance::Tight])
}

#[derive(Debug, Clone, Arbitrary)]
struct QueuedJob {
    #[proptest(strategy = "priority_strategy()")]
    priority: JobPriority,
    #[proptest(strategy = "0i64..10_000")]
    age_minutes: i64,
    #[proptest(strategy = "method_strategy()")]
    method: Method,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Operation {
    Advance,
    ReceiveStep,
    Cancel,
    Fail,
}

#[derive(Debug, Clone, Arbitrary)]
struct PartShape {
    #[proptest(strategy = "[1.0f64..800.0, 1.0f64..800.0, 1.0f64..800.0]")]
    bounding_box: [f64; 3],
    #[proptest(strategy = "0.0f64..2_000_000.0")]
    volume: f64,
    has_overhangs: bool,
    #[proptest(strategy = "0.0f64..=180.0")]
    max_overhang_angle: f64,
    has_thin_walls: bool,
    #[proptest(strategy = "0.1f64..10.0")]
    min_wall_thickness: f64,
    has_complex_geometry: bool,
    #[proptest(strategy = "0.0f64..=1.0")]
    complexity_score: f64,
    has_internal_cavities: bool,
    has_internal_channels: bool,
    requires_supports: bool,
    #[proptest(strategy = "finish_strategy()")]
    surface_roughness: SurfaceFinish,
    #[proptest(strategy = "tolerance_strategy()")]
    tolerance: Tolerance,
}

impl PartShape {
    fn features(&self) -> GeometryFeatureSet {
        GeometryFeatureSet {
            bounding_box: self.bounding_box,
            volume: self.volume,
            surface_area: self.volume / 10.0,
            has_overhangs: self.has_overhangs,
            max_overhang_angle: self.max_overhang_angle,
            has_thin_walls: self.has_thin_walls,
            min_wall_thickness: self.min_wall_thickness,
            has_complex_geometry: self.has_complex_geometry,
            complexity_score: self.complexity_score,
            has_internal_cavities: self.has_internal_cavities,
            has_internal_channels: self.has_internal_channels,
            requires_supports: self.requires_supports,
            surface_roughness: self.surface_roughness,
            tolerance: self.tolerance,
        }
    }
}

/// Position in the method's table; exits rank after every regular stage.
fn rank(method: Method, stage: Stage) -> usize {
    method.stage_index(stage).unwrap_or(usize::MAX)
}

#[test]
fn prop_dispatch_order_is_priority_then_age() {
    let mut runner = TestRunner::default();

    runner
        .run(
            &(
                prop::collection::vec(any::<QueuedJob>(), 0..24),
                method_strategy(),
            ),
            |(queued, method)| {
                let now = Utc::now();
                let jobs: Vec<ManufacturingJob> = queued
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| {
                        let mut job =
                            ManufacturingJob::new(spec.method, "proc", "user", "proj")
                                .with_id(format!("job-{i:03}"))
                                .with_priority(spec.priority);
                        job.current_stage = spec.method.dispatch_stage();
                        job.created_at = now - Duration::minutes(spec.age_minutes);
                        job
                    })
                    .collect();

                let ordered = JobQueue::ordered(&jobs, method);
                let expected = jobs.iter().filter(|job| job.method == method).count();
                prop_assert_eq!(ordered.len(), expected);

                for pair in ordered.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    prop_assert!(a.priority >= b.priority);
                    if a.priority == b.priority {
                        prop_assert!(a.created_at <= b.created_at);
                    }
                }

                let first = JobQueue::next_eligible(&jobs, method);
                prop_assert_eq!(
                    first.map(|job| &job.job_id),
                    ordered.first().map(|job| &job.job_id)
                );
                Ok(())
            },
        )
        .unwrap();
}

async fn run_operations(method: Method, operations: Vec<Operation>) -> TestCaseResult {
    let workflow = WorkflowStateMachine::new(Arc::new(InMemoryJobStore::new()));
    let id = JobId::new("prop-job");
    let job = ManufacturingJob::new(method, "proc", "user", "proj").with_id("prop-job");
    let mut previous = workflow.create(job).await.unwrap();

    for operation in operations {
        let result = match operation {
            Operation::Advance => workflow.advance(&id, None).await,
            Operation::ReceiveStep => {
                workflow
                    .receive_refined_geometry(&id, "mem://part.step")
                    .await
            }
            Operation::Cancel => workflow.cancel(&id, "prop").await,
            Operation::Fail => workflow.mark_failed(&id, "prop").await,
        };
        let current = workflow.get(&id).await.unwrap();

        if previous.is_terminal() {
            prop_assert_eq!(current.current_stage, previous.current_stage);
        } else {
            prop_assert!(
                rank(method, current.current_stage) >= rank(method, previous.current_stage),
                "{:?} moved {} -> {}",
                operation,
                previous.current_stage,
                current.current_stage
            );
        }
        if result.is_err() {
            prop_assert_eq!(current.current_stage, previous.current_stage);
        }
        previous = current;
    }
    Ok(())
}

#[test]
fn prop_stages_only_move_forward() {
    let mut runner = TestRunner::new(Config::with_cases(64));

    runner
        .run(
            &(
                method_strategy(),
                prop::collection::vec(any::<Operation>(), 1..16),
            ),
            |(method, operations)| {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(run_operations(method, operations))
            },
        )
        .unwrap();
}

#[test]
fn prop_recommendations_stay_in_bounds() {
    let mut runner = TestRunner::default();
    let engine = RecommendationEngine::new();

    runner
        .run(&any::<PartShape>(), |shape| {
            let features = shape.features();
            let ranked = engine
                .evaluate(&features)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            prop_assert_eq!(ranked.len(), 4);
            let methods: HashSet<Method> = ranked.iter().map(|rec| rec.method).collect();
            prop_assert_eq!(methods.len(), 4);

            for rec in &ranked {
                prop_assert!((0.0..=1.0).contains(&rec.confidence), "{}", rec.confidence);
                prop_assert!(rec.estimated_cost >= 0.0);
                prop_assert!(!rec.reasoning.is_empty());
            }
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].confidence >= pair[1].confidence);
            }

            for method in [Method::Cfc, Method::Cnc] {
                let profile = profile(method);
                if !features.fits_within(profile.envelope) {
                    let rec = ranked.iter().find(|rec| rec.method == method).unwrap();
                    let short_circuit = profile.short_circuit.unwrap();
                    prop_assert_eq!(rec.confidence, short_circuit.confidence);
                }
            }
            Ok(())
        })
        .unwrap();
}

async fn run_concurrent_passes(machines: usize, jobs: usize, passes: usize) -> TestCaseResult {
    let workflow = Arc::new(WorkflowStateMachine::new(Arc::new(InMemoryJobStore::new())));
    let fleet = Arc::new(FleetRegistry::new());
    for i in 0..machines {
        fleet
            .register(
                MachineSpec::new(format!("p1s-{i}"), Method::Fdm, Vendor::Bambu),
                Arc::new(SimulatedMachine::new(Vendor::Bambu)),
            )
            .await
            .unwrap();
    }
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    for i in 0..jobs {
        let url = format!("mem://part-{i}.stl");
        artifacts.insert(url.clone(), "solid part").await;
        let job = ManufacturingJob::new(Method::Fdm, "proc", "user", "proj")
            .with_id(format!("fdm-{i}"))
            .with_model_url(url);
        workflow.create(job).await.unwrap();
    }

    let dispatcher = Arc::new(FleetDispatcher::new(
        workflow.clone(),
        fleet.clone(),
        artifacts,
        DispatchSettings::default(),
    ));
    let outcomes = futures::future::join_all((0..passes).map(|_| {
        let dispatcher = dispatcher.clone();
        async move { dispatcher.try_dispatch(Method::Fdm).await }
    }))
    .await;

    let mut assigned_jobs = HashSet::new();
    let mut assigned_machines = HashSet::new();
    for outcome in outcomes {
        let outcome = outcome.map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(!matches!(outcome, DispatchOutcome::Failed(_)));
        if let Some((job_id, machine_id)) = outcome.assignment() {
            prop_assert!(assigned_jobs.insert(job_id.clone()), "{} twice", job_id);
            prop_assert!(
                assigned_machines.insert(machine_id.clone()),
                "{} twice",
                machine_id
            );
        }
    }
    prop_assert_eq!(assigned_jobs.len(), machines.min(jobs).min(passes));

    let held: Vec<JobId> = fleet
        .snapshot()
        .await
        .into_iter()
        .filter_map(|record| record.current_job)
        .collect();
    let unique: HashSet<&JobId> = held.iter().collect();
    prop_assert_eq!(unique.len(), held.len());
    prop_assert_eq!(held.len(), assigned_jobs.len());
    Ok(())
}

#[test]
fn prop_concurrent_passes_never_double_assign() {
    let mut runner = TestRunner::new(Config::with_cases(32));

    runner
        .run(&(1usize..4, 0usize..6, 1usize..8), |(machines, jobs, passes)| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(run_concurrent_passes(machines, jobs, passes))
        })
        .unwrap();
}
