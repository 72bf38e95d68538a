use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use fundflow_core::{Actor, FundId, Role, UserId};
use fundflow_server::state_machine::repository::SqliteRepository;
use fundflow_server::state_machine::{EngineConfig, WorkflowEngine};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

/// Fundflow: operator tooling for the fund request state database
#[derive(Parser, Debug)]
#[command(name = "fundflow")]
#[command(about = "Inspect and repair a fundflow state database", long_about = None)]
struct Cli {
    /// Directory holding fundflow-state.db
    #[arg(long, env = "STATE_DIR", default_value = ".", global = true)]
    state_dir: PathBuf,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List funds with their budgets
    Funds,
    /// Check whether an amount fits in a fund's remaining budget
    Budget(BudgetArgs),
    /// Recompute a fund's remaining balance from its disbursements
    Reconcile(ReconcileArgs),
    /// Show the review steps a request would be routed through
    Plan(PlanArgs),
    /// Print the audit trail of a request, fund or disbursement
    Audit(AuditArgs),
    /// List reviews waiting on a user
    Queue(QueueArgs),
}

#[derive(Parser, Debug)]
struct BudgetArgs {
    fund_id: FundId,

    /// Amount to check
    #[arg(long)]
    amount: Decimal,
}

#[derive(Parser, Debug)]
struct ReconcileArgs {
    fund_id: FundId,

    /// User recorded as performing the reconciliation
    #[arg(long, env = "FUNDFLOW_OPERATOR", default_value = "operator")]
    operator: String,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    fund_id: FundId,

    #[arg(long)]
    amount: Decimal,

    /// Intended use category
    #[arg(long)]
    category: String,
}

#[derive(Parser, Debug)]
struct AuditArgs {
    /// Request, fund or disbursement id
    entity_id: String,
}

#[derive(Parser, Debug)]
struct QueueArgs {
    /// User whose queue to show
    user_id: String,

    /// Roles of the user, comma-separated (e.g. reviewer,fund_manager)
    #[arg(long, value_delimiter = ',', default_value = "reviewer")]
    roles: Vec<Role>,
}

fn open_engine(state_dir: &std::path::Path) -> Result<WorkflowEngine> {
    let db_path = state_dir.join("fundflow-state.db");
    if !db_path.exists() {
        return Err(anyhow!("No state database at {}", db_path.display()));
    }
    let repo = SqliteRepository::new(&db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    Ok(WorkflowEngine::new(Arc::new(repo), EngineConfig::default()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn run_funds(engine: &WorkflowEngine, json: bool) -> Result<()> {
    let funds = engine.list_funds().await?;
    if json {
        return print_json(&funds);
    }
    if funds.is_empty() {
        println!("No funds");
    }
    for fund in &funds {
        println!(
            "{}  {}  {:?}  remaining {} of {}  ({:?})",
            fund.id,
            fund.name,
            fund.status,
            fund.remaining_budget,
            fund.total_budget,
            fund.budget_enforcement
        );
    }
    Ok(())
}

async fn run_budget(engine: &WorkflowEngine, args: BudgetArgs, json: bool) -> Result<()> {
    let check = engine.check_budget(args.fund_id, args.amount).await?;
    if json {
        return print_json(&check);
    }
    println!("Total budget: {}", check.totals.total_budget);
    println!("Paid:         {}", check.totals.paid);
    println!("Committed:    {}", check.totals.committed);
    println!("Remaining:    {}", check.remaining);
    if check.would_exceed {
        println!(
            "{} exceeds the remaining budget by {}",
            check.requested,
            check.requested - check.remaining
        );
    } else {
        println!("{} fits", check.requested);
    }
    Ok(())
}

async fn run_reconcile(engine: &WorkflowEngine, args: ReconcileArgs, json: bool) -> Result<()> {
    let operator = Actor::new(
        UserId::from(args.operator.as_str()),
        args.operator.clone(),
        "",
        [Role::SuperAdmin],
    );
    let outcome = engine
        .reconcile_fund_balance(&operator, args.fund_id)
        .await?;
    if json {
        return print_json(&outcome);
    }
    if outcome.changed {
        println!(
            "Remaining balance corrected: {} -> {}",
            outcome.previous, outcome.recomputed
        );
    } else {
        println!("Remaining balance already correct: {}", outcome.recomputed);
    }
    Ok(())
}

async fn run_plan(engine: &WorkflowEngine, args: PlanArgs, json: bool) -> Result<()> {
    let plan = engine
        .preview_plan(args.fund_id, args.amount, &args.category)
        .await?;
    if json {
        return print_json(&plan);
    }
    for step in &plan {
        let sla = step
            .sla_days
            .map(|d| format!(", {} day SLA", d))
            .unwrap_or_default();
        println!(
            "{}. {} ({:?}, {:?}{})",
            step.step_order, step.step_name, step.assignment, step.permission, sla
        );
    }
    Ok(())
}

async fn run_audit(engine: &WorkflowEngine, args: AuditArgs, json: bool) -> Result<()> {
    let entity_id = args.entity_id.trim();
    let entries = engine.audit_trail(entity_id).await?;
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No audit entries for {}", entity_id);
    }
    for entry in &entries {
        println!(
            "{}  {:?}  by {}  {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.action,
            entry.actor_name,
            entry.details
        );
    }
    Ok(())
}

async fn run_queue(engine: &WorkflowEngine, args: QueueArgs, json: bool) -> Result<()> {
    let actor = Actor::new(
        UserId::from(args.user_id.as_str()),
        args.user_id.clone(),
        "",
        args.roles,
    );
    let pending = engine.pending_reviews_for(&actor).await?;
    if json {
        return print_json(&pending);
    }
    if pending.is_empty() {
        println!("Nothing waiting on {}", args.user_id);
    }
    for item in &pending {
        let due = item
            .due_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {}  {}  step '{}'  due {}{}",
            item.request_number,
            item.fund_name,
            item.student_name,
            item.requested_amount,
            item.step_name,
            due,
            if item.overdue { " (OVERDUE)" } else { "" }
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let engine = open_engine(&cli.state_dir)?;

    match cli.command {
        Commands::Funds => run_funds(&engine, cli.json).await,
        Commands::Budget(args) => run_budget(&engine, args, cli.json).await,
        Commands::Reconcile(args) => run_reconcile(&engine, args, cli.json).await,
        Commands::Plan(args) => run_plan(&engine, args, cli.json).await,
        Commands::Audit(args) => run_audit(&engine, args, cli.json).await,
        Commands::Queue(args) => run_queue(&engine, args, cli.json).await,
    }
}
