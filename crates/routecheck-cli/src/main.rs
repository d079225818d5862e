//! routecheck - routing evaluation harness CLI
//!
//! ## Commands
//!
//! - `route`: Classify a single query and print the route plan
//! - `run`: Run a test batch, write the report and check the quality gate
//! - `gen-cases`: Derive a test batch from the catalog's examples
//! - `expand-cases`: Ask the completion service for more test utterances
//! - `catalog`: List the operation catalog

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use routecheck_core::classifier::Classifier;
use routecheck_core::{
    display_name, emit_gate_evaluated, evaluate_gate, expand_with_model, load_cases, load_specs,
    render_summary_md, save_cases, service_from_config, write_report_dir, BatchReport, Evaluator,
    ExecutionGateway, GateRule, GateRuleSet, GateThresholds, HarnessConfig, HttpBackend,
    HttpCompletionClient, ModelClassifier, OperationCatalog, RuleClassifier, RunDriver, Tracer,
    UserTurn,
};

#[derive(Parser)]
#[command(name = "routecheck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Routing evaluation harness for natural-language operation routers", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Operation catalog (JSON); the built-in HR catalog when omitted
    #[arg(long, global = true, env = "ROUTECHECK_CATALOG")]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClassifierKind {
    /// Deterministic keyword cascade
    Rule,
    /// Completion-service backed classifier
    Model,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify one query and print the route plan
    Route {
        /// The user query
        query: String,

        #[arg(short, long, value_enum, default_value = "rule")]
        classifier: ClassifierKind,

        /// Print the route plan as JSON
        #[arg(long)]
        raw: bool,
    },

    /// Run a test batch through classify, evaluate, execute and score
    Run(RunArgs),

    /// Write a test batch derived from the catalog examples
    GenCases {
        /// Output path for the batch
        #[arg(short, long, default_value = "data/test_cases.json")]
        out: PathBuf,
    },

    /// Generate extra test cases with the completion service
    ExpandCases {
        /// Output path for the batch
        #[arg(short, long, default_value = "data/generated_cases.json")]
        out: PathBuf,

        /// New positive utterances per operation
        #[arg(long, default_value = "5")]
        positive: usize,

        /// New negative utterances per operation
        #[arg(long, default_value = "3")]
        negative: usize,
    },

    /// List the operation catalog
    Catalog,
}

#[derive(Args)]
struct RunArgs {
    /// Test batch (JSON array of test cases)
    #[arg(long)]
    cases: PathBuf,

    /// Response specs (JSON array of `{id, spec}`)
    #[arg(long)]
    specs: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "rule")]
    classifier: ClassifierKind,

    /// Routing only: do not call the backend
    #[arg(long)]
    no_execute: bool,

    /// Directory for report.json and summary.md
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Cases in flight at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Minimum routing accuracy (0.0-1.0)
    #[arg(long)]
    min_accuracy: Option<f64>,

    /// Minimum mean shape compliance (0.0-1.0); enables the shape rule
    #[arg(long)]
    min_shape: Option<f64>,

    /// Minimum hallucination pass rate (0.0-1.0); enables the hallucination rule
    #[arg(long)]
    min_hallucination: Option<f64>,

    /// Exit non-zero when the quality gate fails
    #[arg(long)]
    fail_on_gate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    routecheck_core::init_tracing(cli.json, routecheck_core::level_for_verbosity(cli.verbose));

    let config = HarnessConfig::from_env();
    let catalog = Arc::new(load_catalog(cli.catalog.as_deref())?);

    match cli.command {
        Commands::Route {
            query,
            classifier,
            raw,
        } => cmd_route(&config, catalog, classifier, &query, raw).await,
        Commands::Run(args) => cmd_run(&config, catalog, &args).await.map(|_| ()),
        Commands::GenCases { out } => cmd_gen_cases(&catalog, &out),
        Commands::ExpandCases {
            out,
            positive,
            negative,
        } => cmd_expand_cases(&config, &catalog, &out, positive, negative).await,
        Commands::Catalog => cmd_catalog(&catalog),
    }
}

fn load_catalog(path: Option<&Path>) -> Result<OperationCatalog> {
    match path {
        Some(path) => OperationCatalog::from_path(path)
            .with_context(|| format!("Failed to load catalog from {:?}", path)),
        None => OperationCatalog::builtin().context("Failed to load built-in catalog"),
    }
}

fn build_classifier(
    config: &HarnessConfig,
    catalog: Arc<OperationCatalog>,
    kind: ClassifierKind,
) -> Result<Arc<dyn Classifier>> {
    match kind {
        ClassifierKind::Rule => Ok(Arc::new(RuleClassifier::default())),
        ClassifierKind::Model => {
            let client = HttpCompletionClient::new(config.completion.clone())
                .context("The model classifier needs a completion service")?;
            Ok(Arc::new(
                ModelClassifier::new(Arc::new(client), catalog)
                    .with_cooldown(config.classifier_cooldown()),
            ))
        }
    }
}

/// Classify one query.
async fn cmd_route(
    config: &HarnessConfig,
    catalog: Arc<OperationCatalog>,
    kind: ClassifierKind,
    query: &str,
    raw: bool,
) -> Result<()> {
    let classifier = build_classifier(config, catalog.clone(), kind)?;
    let plan = classifier
        .route(&UserTurn::new(query))
        .await
        .context("Classification failed")?;

    if raw {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let known = catalog.contains(plan.operation.trim());
    println!("Operation: {} ({})", plan.operation, display_name(plan.operation.trim()));
    println!("Reason:    {}", plan.reason);
    if !known {
        println!("Note:      not a catalog operation");
    }
    Ok(())
}

/// Run a batch. Returns the report so tests can inspect it.
async fn cmd_run(
    config: &HarnessConfig,
    catalog: Arc<OperationCatalog>,
    args: &RunArgs,
) -> Result<BatchReport> {
    let cases = load_cases(&args.cases)
        .with_context(|| format!("Failed to load test batch {:?}", args.cases))?;
    let specs = match &args.specs {
        Some(path) => load_specs(path)
            .with_context(|| format!("Failed to load response specs {:?}", path))?,
        None => HashMap::new(),
    };

    let classifier = build_classifier(config, catalog.clone(), args.classifier)?;
    let evaluator = Evaluator::new(service_from_config(config.completion.clone()));

    let mut run_config = config.run.clone().with_execute(!args.no_execute);
    if let Some(n) = args.max_concurrent {
        run_config = run_config.with_max_concurrent(n);
    }

    let mut driver = RunDriver::new(catalog, classifier, evaluator).with_config(run_config);
    if !args.no_execute {
        let backend = HttpBackend::new(config.backend.clone())
            .context("Failed to create backend client")?;
        let tracer = Tracer::new(config.trace.build_sink());
        driver = driver.with_gateway(ExecutionGateway::new(Arc::new(backend), tracer));
    }

    let outcome = driver.run(&cases, &specs).await.context("Batch run failed")?;
    let report = BatchReport::build(&cases, &outcome)?;

    if let Some(dir) = &args.out {
        write_report_dir(dir, &report)?;
        info!(dir = %dir.display(), "report written");
    }
    println!("{}", render_summary_md(&report));

    let rules = gate_rules(args);
    let verdict = evaluate_gate(&rules, &report.summary);
    emit_gate_evaluated(
        &report.batch_id,
        report.summary.accuracy().unwrap_or(0.0),
        verdict.passed(),
    );

    if verdict.passed() {
        println!("Quality gate: passed");
    } else {
        println!("Quality gate: FAILED");
        for violation in &verdict.violations {
            println!("  - {}", violation.reason);
        }
    }
    for rule in &verdict.skipped {
        println!("  (skipped {:?}: nothing scored)", rule);
    }

    if args.fail_on_gate && !verdict.passed() {
        anyhow::bail!("Quality gate failed");
    }
    Ok(report)
}

fn gate_rules(args: &RunArgs) -> GateRuleSet {
    let defaults = GateThresholds::default();
    let thresholds = GateThresholds {
        min_accuracy: args.min_accuracy.unwrap_or(defaults.min_accuracy),
        min_shape_compliance: args.min_shape.unwrap_or(defaults.min_shape_compliance),
        min_hallucination_pass_rate: args
            .min_hallucination
            .unwrap_or(defaults.min_hallucination_pass_rate),
        fail_fast: false,
    };

    let mut rules = GateRuleSet::standard().with_thresholds(thresholds);
    if args.min_shape.is_some() {
        rules = rules.with_rule(GateRule::MinShapeCompliance);
    }
    if args.min_hallucination.is_some() {
        rules = rules.with_rule(GateRule::MinHallucinationPassRate);
    }
    rules
}

/// Write the catalog-derived test batch.
fn cmd_gen_cases(catalog: &OperationCatalog, out: &Path) -> Result<()> {
    let cases = catalog.generate_test_cases();
    save_cases(out, &cases).with_context(|| format!("Failed to write {:?}", out))?;
    println!("Wrote {} test cases to {:?}", cases.len(), out);
    Ok(())
}

/// Generate extra utterances with the completion service.
async fn cmd_expand_cases(
    config: &HarnessConfig,
    catalog: &OperationCatalog,
    out: &Path,
    positive: usize,
    negative: usize,
) -> Result<()> {
    let client = HttpCompletionClient::new(config.completion.clone())
        .context("Case expansion needs a completion service")?;
    let cases = expand_with_model(&client, catalog, positive, negative).await;
    if cases.is_empty() {
        anyhow::bail!("The completion service produced no usable test cases");
    }
    save_cases(out, &cases).with_context(|| format!("Failed to write {:?}", out))?;
    println!("Wrote {} generated test cases to {:?}", cases.len(), out);
    Ok(())
}

fn cmd_catalog(catalog: &OperationCatalog) -> Result<()> {
    for op in catalog.iter() {
        println!("{:<28} {}", op.id, display_name(&op.id));
        println!("{:<28} {}", "", op.purpose);
        if !op.params.is_empty() {
            println!("{:<28} params: {}", "", op.params.join(", "));
        }
    }
    println!("\n{} operations", catalog.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use routecheck_core::{FailureCategory, TestCase};

    fn run_args(cases: PathBuf, out: PathBuf) -> RunArgs {
        RunArgs {
            cases,
            specs: None,
            classifier: ClassifierKind::Rule,
            no_execute: true,
            out: Some(out),
            max_concurrent: Some(2),
            min_accuracy: Some(0.5),
            min_shape: None,
            min_hallucination: None,
            fail_on_gate: true,
        }
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "routecheck",
            "-vv",
            "run",
            "--cases",
            "cases.json",
            "--classifier",
            "model",
            "--no-execute",
            "--min-shape",
            "0.7",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.classifier, ClassifierKind::Model);
        assert!(args.no_execute);

        let rules = gate_rules(&args);
        assert_eq!(rules.rules, vec![GateRule::MinAccuracy, GateRule::MinShapeCompliance]);
        assert_eq!(rules.thresholds.min_shape_compliance, 0.7);
    }

    #[test]
    fn test_gen_cases_writes_catalog_batch() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data").join("cases.json");
        let catalog = OperationCatalog::builtin().unwrap();
        cmd_gen_cases(&catalog, &out).unwrap();

        let cases = load_cases(&out).unwrap();
        assert_eq!(cases.len(), catalog.generate_test_cases().len());
    }

    #[tokio::test]
    async fn test_routing_only_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let cases_path = dir.path().join("cases.json");
        save_cases(
            &cases_path,
            &[
                TestCase::new("a", "我的年假还有几天", "/hr/leave/balance"),
                TestCase::new("b", "帮我查下我的合同续签", "/hr/contract/renew"),
            ],
        )
        .unwrap();

        let out = dir.path().join("report");
        let catalog = Arc::new(OperationCatalog::builtin().unwrap());
        let report = cmd_run(&HarnessConfig::default(), catalog, &run_args(cases_path, out.clone()))
            .await
            .unwrap();

        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.failures[0].category, FailureCategory::RoutingMismatch);
        assert!(report.failures[0].reason.contains("路径高度相似"));
        assert!(out.join("report.json").exists());
        assert!(out.join("summary.md").exists());
    }

    #[tokio::test]
    async fn test_failed_gate_is_an_error_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let cases_path = dir.path().join("cases.json");
        save_cases(
            &cases_path,
            &[TestCase::new("a", "公司年会几号", "/hr/attendance/checkin")],
        )
        .unwrap();

        let catalog = Arc::new(OperationCatalog::builtin().unwrap());
        let args = run_args(cases_path, dir.path().join("report"));
        let err = cmd_run(&HarnessConfig::default(), catalog, &args)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Quality gate failed"));
    }

    #[tokio::test]
    async fn test_rule_route_prints_plan() {
        let catalog = Arc::new(OperationCatalog::builtin().unwrap());
        cmd_route(&HarnessConfig::default(), catalog, ClassifierKind::Rule, "我的年假还有几天", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_model_route_requires_completion_service() {
        let catalog = Arc::new(OperationCatalog::builtin().unwrap());
        let err = cmd_route(&HarnessConfig::default(), catalog, ClassifierKind::Model, "q", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("completion service"));
    }
}
