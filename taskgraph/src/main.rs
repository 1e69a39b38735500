//! `taskgraph` command line.
//!
//! Plans a task into linear steps, turns them into a plan graph and walks it
//! with a model backend, replanning when a step keeps failing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use taskgraph::agents::evaluator::build_evaluators;
use taskgraph::agents::linear_planner::LinearPlanner;
use taskgraph::core::graph::PlanGraph;
use taskgraph::core::tool::ToolRegistry;
use taskgraph::error::PlanningError;
use taskgraph::exit_codes;
use taskgraph::io::backend::ModelRegistry;
use taskgraph::io::config::{DEFAULT_CONFIG_FILE, PlannerConfig, load_config, write_config};
use taskgraph::io::plan_file::{PlanFile, load_plan, write_plan};
use taskgraph::io::prompt::PromptBuilder;
use taskgraph::io::report::{RunReport, write_report};
use taskgraph::logging;
use taskgraph::planner::{Decision, GraphPlanner, PlanRun, PlannerSettings};

#[derive(Parser)]
#[command(
    name = "taskgraph",
    version,
    about = "Plan, execute and replan tasks with a language model"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Ask the model for a linear plan and print it as JSON.
    Plan {
        #[arg(long)]
        task: String,
        /// Extra background handed to the planner.
        #[arg(long, default_value = "")]
        knowledge: String,
        /// Model name from `[[models]]`; defaults to `default_model`.
        #[arg(long)]
        model: Option<String>,
        /// Write the plan here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Plan (or load) steps and run them through the graph planner.
    Run {
        #[arg(long)]
        task: String,
        /// Plan file (`{"steps": [...]}`) used instead of asking the model.
        #[arg(long)]
        steps: Option<PathBuf>,
        /// Extra background included in every node prompt.
        #[arg(long, default_value = "")]
        background: String,
        /// Score results with the configured evaluators.
        #[arg(long)]
        evaluate: bool,
        #[arg(long)]
        model: Option<String>,
        /// Write a JSON run report here.
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PlanningError>() {
        Some(planning) if planning.is_plan_abort() => exit_codes::ABORTED,
        _ => exit_codes::INVALID,
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Plan {
            task,
            knowledge,
            model,
            out,
        } => cmd_plan(&cli.config, &task, &knowledge, model.as_deref(), out.as_deref()),
        Command::Run {
            task,
            steps,
            background,
            evaluate,
            model,
            report,
        } => cmd_run(
            &cli.config,
            RunArgs {
                task,
                steps,
                background,
                evaluate,
                model,
                report,
            },
        ),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &PlannerConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_plan(
    config_path: &Path,
    task: &str,
    knowledge: &str,
    model: Option<&str>,
    out: Option<&Path>,
) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let models = ModelRegistry::from_config(&cfg)?;
    let backend = models.get(model.unwrap_or(&cfg.default_model))?;
    let steps = LinearPlanner::new(PromptBuilder::new(cfg.prompt_budget_bytes)).plan(
        backend.as_ref(),
        task,
        &ToolRegistry::new(),
        knowledge,
        &cfg.categories(),
    )?;

    match out {
        Some(path) => write_plan(path, &steps)?,
        None => {
            let plan = PlanFile { steps };
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("serialize plan")?
            );
        }
    }
    Ok(exit_codes::OK)
}

struct RunArgs {
    task: String,
    steps: Option<PathBuf>,
    background: String,
    evaluate: bool,
    model: Option<String>,
    report: Option<PathBuf>,
}

fn cmd_run(config_path: &Path, args: RunArgs) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let models = ModelRegistry::from_config(&cfg)?;
    let backend = models.get(args.model.as_deref().unwrap_or(&cfg.default_model))?;
    let tools = ToolRegistry::new();

    let steps = match &args.steps {
        Some(path) => load_plan(path)?,
        None => LinearPlanner::new(PromptBuilder::new(cfg.prompt_budget_bytes)).plan(
            backend.as_ref(),
            &args.task,
            &tools,
            &args.background,
            &cfg.categories(),
        )?,
    };
    let graph = PlanGraph::from_steps(&steps, &tools, cfg.node_defaults())?;

    let mut settings = PlannerSettings::from(&cfg);
    settings.evaluation_enabled |= args.evaluate;
    let mut planner = GraphPlanner::new(backend, settings);
    if settings.evaluation_enabled {
        planner = planner.with_evaluators(build_evaluators(&cfg, &models)?);
    }

    let started_at = Utc::now();
    let mut run = PlanRun::new(args.task, graph).with_background(args.background);
    let result = planner.execute_plan(&mut run, |event| {
        let label = match event.decision {
            Decision::Advance | Decision::Complete => "passed",
            Decision::Retry => "retrying",
            Decision::Replan => "replanning",
        };
        eprintln!(
            "node {} attempt {}: score {:.2}, {label}",
            event.node_id, event.attempt, event.score
        );
    });

    if let Some(path) = &args.report {
        write_report(path, &RunReport::new(&run, &result, started_at))?;
    }

    let outcome = result?;
    info!(steps = outcome.steps_executed, replans = outcome.replans, "run finished");
    println!("{}", outcome.history.render());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["taskgraph", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from("taskgraph.toml"));
    }

    #[test]
    fn parse_run_with_steps_and_report() {
        let cli = Cli::parse_from([
            "taskgraph",
            "--config",
            "alt.toml",
            "run",
            "--task",
            "Plan a trip",
            "--steps",
            "plan.json",
            "--evaluate",
            "--report",
            "report.json",
        ]);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        match cli.command {
            Command::Run {
                task,
                steps,
                evaluate,
                report,
                model,
                ..
            } => {
                assert_eq!(task, "Plan a trip");
                assert_eq!(steps, Some(PathBuf::from("plan.json")));
                assert!(evaluate);
                assert_eq!(report, Some(PathBuf::from("report.json")));
                assert_eq!(model, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn aborts_map_to_their_own_exit_code() {
        let abort = anyhow::Error::new(PlanningError::ReplanBudgetExhausted(2));
        assert_eq!(exit_code_for(&abort), exit_codes::ABORTED);
        let failure = anyhow::Error::new(PlanningError::EmptyPlan);
        assert_eq!(exit_code_for(&failure), exit_codes::INVALID);
        assert_eq!(exit_code_for(&anyhow::anyhow!("io")), exit_codes::INVALID);
    }
}
