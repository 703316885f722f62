use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use fabflow::machines::{
    CachedArtifactStore, HttpArtifactStore, InMemoryArtifactStore, RoutedArtifactStore,
};
use fabflow::{
    config, init_telemetry, spawn_dispatch_loops, DispatchOutcome, FabflowConfig,
    FleetDispatcher, FleetRegistry, GeometryFeatureSet, InMemoryJobStore, JobPriority,
    ManufacturingJob, Method, RecommendationEngine, ShutdownCoordinator, SimulatedMachine,
    WorkflowStateMachine,
};

#[derive(Parser)]
#[command(name = "fabflow")]
#[command(about = "Manufacturing job orchestration across a heterogeneous machine fleet")]
#[command(long_about = "fabflow recommends a manufacturing method from part geometry, tracks jobs \
                       through each method's workflow stages and dispatches queued jobs to idle machines.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank manufacturing methods for a part's geometry feature set
    Recommend {
        /// JSON file produced by the geometry analyzer
        file: PathBuf,
        /// Print the ranking as JSON
        #[arg(long, help = "Emit machine-readable JSON instead of text")]
        json: bool,
    },
    /// Show every method's stage sequence, dispatch stage and lead time
    Stages,
    /// Dispatch demo jobs to a simulated fleet and print the resulting queue summary
    Simulate {
        /// Number of demo jobs to create
        #[arg(long, default_value = "8")]
        jobs: usize,
        /// Number of dispatch passes to run
        #[arg(long, default_value = "6")]
        passes: usize,
    },
    /// Run the scheduled dispatch loops against the simulated fleet until Ctrl-C
    Run {
        /// Number of demo jobs to seed
        #[arg(long, default_value = "4")]
        jobs: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config()?;
    init_telemetry(settings.observability.json_logs, &settings.observability.log_level)?;

    match cli.command {
        Commands::Recommend { file, json } => recommend_command(&file, json),
        Commands::Stages => {
            stages_command();
            Ok(())
        }
        Commands::Simulate { jobs, passes } => tokio::runtime::Runtime::new()?
            .block_on(async { simulate_command(settings, jobs, passes).await }),
        Commands::Run { jobs } => {
            tokio::runtime::Runtime::new()?.block_on(async { run_command(settings, jobs).await })
        }
    }
}

fn recommend_command(file: &Path, json: bool) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read feature set {}", file.display()))?;
    let features: GeometryFeatureSet =
        serde_json::from_str(&raw).context("Feature set is not valid JSON")?;
    let ranked = RecommendationEngine::new().evaluate(&features)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }

    println!("MANUFACTURING RECOMMENDATIONS");
    for (i, rec) in ranked.iter().enumerate() {
        println!();
        println!(
            "{}. {} - {:.0}% confidence",
            i + 1,
            rec.method.label(),
            rec.confidence * 100.0
        );
        println!("   Cost: £{:.2}", rec.estimated_cost);
        println!("   Time: {}", rec.estimated_time);
        println!("   Material: {}", rec.material_suggestion);
        println!("   Reasoning: {}", rec.reasoning);
        println!("   Pros:");
        for pro in &rec.pros {
            println!("     + {pro}");
        }
        println!("   Cons:");
        for con in &rec.cons {
            println!("     - {con}");
        }
    }
    Ok(())
}

fn stages_command() {
    for method in Method::ALL {
        let stages: Vec<&str> = method.stages().iter().map(|stage| stage.as_str()).collect();
        println!(
            "{}: {} (dispatch at {}, lead time {}h)",
            method.label(),
            stages.join(" -> "),
            method.dispatch_stage(),
            method.lead_time().num_hours()
        );
        for stage in method.stages() {
            let checklist = method.checklist(*stage);
            if checklist.is_empty() {
                continue;
            }
            println!("  {stage} checklist:");
            for item in checklist {
                println!("    [ ] {item}");
            }
        }
    }
}

struct SimulatedShop {
    dispatcher: Arc<FleetDispatcher>,
    machines: Vec<Arc<SimulatedMachine>>,
}

async fn build_shop(settings: &FabflowConfig, jobs: usize) -> Result<SimulatedShop> {
    let workflow = Arc::new(WorkflowStateMachine::new(Arc::new(InMemoryJobStore::new())));
    let fleet = Arc::new(FleetRegistry::new());
    let mut machines = Vec::new();
    for machine in &settings.fleet {
        let simulated = Arc::new(SimulatedMachine::new(machine.vendor));
        fleet.register(machine.to_spec(), simulated.clone()).await?;
        machines.push(simulated);
    }

    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let priorities = JobPriority::ALL;
    for i in 0..jobs {
        let method = Method::ALL[i % Method::ALL.len()];
        let job_id = format!("{method}-demo-{i:03}");
        let model_url = format!("mem://demo/{job_id}.stl");
        artifacts.insert(model_url.clone(), format!("solid {job_id}")).await;

        let job = ManufacturingJob::new(method, format!("proc-{i:03}"), "demo-user", "demo")
            .with_id(job_id.as_str())
            .with_priority(priorities[i % priorities.len()])
            .with_model_url(model_url);
        let job = workflow.create(job).await?;

        if method.requires_refined_geometry() {
            let step_url = format!("mem://demo/{job_id}.step");
            artifacts.insert(step_url.clone(), format!("ISO-10303-21 {job_id}")).await;
            workflow.receive_refined_geometry(&job.job_id, &step_url).await?;
            workflow
                .advance(&job.job_id, Some("Planning checklist started"))
                .await?;
        }
    }

    let remote = Arc::new(HttpArtifactStore::new(settings.artifact_fetch_timeout())?);
    let cached = Arc::new(CachedArtifactStore::new(
        Arc::new(RoutedArtifactStore::new(artifacts, remote)),
        settings.artifacts.cache_capacity,
        Duration::from_secs(settings.artifacts.cache_ttl_seconds),
    ));
    let dispatcher = Arc::new(FleetDispatcher::new(
        workflow,
        fleet,
        cached,
        settings.dispatch_settings(),
    ));
    Ok(SimulatedShop {
        dispatcher,
        machines,
    })
}

async fn simulate_command(settings: &FabflowConfig, jobs: usize, passes: usize) -> Result<()> {
    let shop = build_shop(settings, jobs).await?;
    shop.dispatcher.connect_all().await;

    for pass in 1..=passes {
        for method in &settings.dispatch.methods {
            let outcome = shop.dispatcher.try_dispatch(*method).await?;
            if let DispatchOutcome::Failed(failure) = &outcome {
                eprintln!("pass {pass}: {failure}");
            }
        }

        // Operators finish post-processing of anything that left its machine
        let workflow = shop.dispatcher.workflow();
        for method in Method::ALL {
            for job in workflow.query_by_method(method).await? {
                let past_fabrication = !job.is_terminal()
                    && job.machine_id.is_some()
                    && job.current_stage != method.fabrication_stage();
                if past_fabrication {
                    workflow.advance(&job.job_id, Some("Post-processing done")).await?;
                }
            }
        }

        for machine in &shop.machines {
            machine.collect().await;
            machine.finish().await;
        }
    }

    let summary = shop.dispatcher.workflow().queue_summary().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    shop.dispatcher.disconnect_all().await;
    Ok(())
}

async fn run_command(settings: &FabflowConfig, jobs: usize) -> Result<()> {
    let shop = build_shop(settings, jobs).await?;
    shop.dispatcher.connect_all().await;

    let coordinator = ShutdownCoordinator::new();
    let handles = spawn_dispatch_loops(
        shop.dispatcher.clone(),
        &settings.dispatch.methods,
        settings.dispatch_interval(),
        coordinator.subscribe(),
    );
    info!(machines = shop.machines.len(), "Dispatch loops running, press Ctrl-C to stop");

    coordinator.wait_for_signal().await?;
    coordinator
        .shutdown_all(handles, Duration::from_secs(settings.dispatch.io_timeout_seconds))
        .await;
    shop.dispatcher.disconnect_all().await;
    Ok(())
}
