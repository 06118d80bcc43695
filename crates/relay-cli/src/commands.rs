//! Subcommand handlers

use crate::Outcome;
use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use relay_core::{
    CommandCheck, ContributionStatus, Criterion, Direction, Ledger, LedgerState, LedgerStore,
    NewContribution, RelayConfig, TaskId, Verifier, WorkItem,
};
use relay_handoff::{next_eligible, plan_waves, HandoffError};
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) async fn dispatch(matches: &ArgMatches, config: &RelayConfig) -> Result<Outcome> {
    let store = LedgerStore::open(&config.store).await.with_context(|| {
        format!(
            "failed to open ledger directory {}",
            config.store.data_dir.display()
        )
    })?;

    match matches.subcommand() {
        Some(("init", args)) => init(&store, task(args)?).await,
        Some(("show", args)) => show(&store, task(args)?, args.get_flag("json")).await,
        Some(("list", _)) => list(&store).await,
        Some(("criterion", args)) => criterion(&store, args).await,
        Some(("item", args)) => item(&store, args).await,
        Some(("contribute", args)) => contribute(&store, args).await,
        Some(("block", args)) => block(&store, args).await,
        Some(("transition", args)) => transition(&store, args).await,
        Some(("verify", args)) => verify(&store, config, args).await,
        Some(("next", args)) => next(&store, task(args)?).await,
        Some(("plan", args)) => plan(&store, task(args)?).await,
        Some(("next-steps", args)) => next_steps(&store, args).await,
        Some(("question", args)) => question(&store, args).await,
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}

fn task(args: &ArgMatches) -> Result<&TaskId> {
    args.get_one::<TaskId>("task").context("missing task id")
}

fn text(args: &ArgMatches, id: &str) -> String {
    args.get_one::<String>(id).cloned().unwrap_or_default()
}

async fn init(store: &LedgerStore, task_id: &TaskId) -> Result<Outcome> {
    let ledger = store.get_or_create(task_id).await?;
    println!("{} ({})", ledger.task_id, ledger.state);
    Ok(Outcome::Done)
}

async fn show(store: &LedgerStore, task_id: &TaskId, json: bool) -> Result<Outcome> {
    let ledger = store.read(task_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ledger)?);
    } else {
        print_ledger(&ledger);
    }
    Ok(Outcome::Done)
}

async fn list(store: &LedgerStore) -> Result<Outcome> {
    for task_id in store.list().await? {
        println!("{task_id}");
    }
    Ok(Outcome::Done)
}

async fn criterion(store: &LedgerStore, args: &ArgMatches) -> Result<Outcome> {
    let task_id = task(args)?;
    let key = text(args, "key");
    let mut criterion = Criterion::new(key.clone(), text(args, "description"), text(args, "check"));
    if let Some(threshold) = args.get_one::<f64>("threshold") {
        let direction = args.get_one::<Direction>("direction").copied().unwrap_or_default();
        criterion = criterion.with_threshold(*threshold, direction);
    }

    store.add_criterion(task_id, criterion).await?;
    println!("criterion {key} added to {task_id}");
    Ok(Outcome::Done)
}

async fn item(store: &LedgerStore, args: &ArgMatches) -> Result<Outcome> {
    let task_id = task(args)?;
    let mut item = WorkItem::new(text(args, "item")).with_description(text(args, "description"));
    for dep in args.get_many::<String>("depends-on").into_iter().flatten() {
        item = item.depends_on(dep.clone());
    }

    let item_id = item.item_id.clone();
    store.declare_item(task_id, item).await?;
    println!("item {item_id} declared on {task_id}");
    Ok(Outcome::Done)
}

fn new_contribution(args: &ArgMatches, status: ContributionStatus) -> NewContribution {
    let mut new = NewContribution::new(text(args, "worker"), status)
        .with_findings(text(args, "findings"))
        .with_handoff_notes(text(args, "notes"));
    if let Some(item) = args.try_get_one::<String>("item").ok().flatten() {
        new = new.for_item(item.clone());
    }
    new
}

async fn contribute(store: &LedgerStore, args: &ArgMatches) -> Result<Outcome> {
    let task_id = task(args)?;
    let status = args
        .get_one::<ContributionStatus>("status")
        .copied()
        .context("missing --status")?;

    let committed = store
        .append_contribution(task_id, new_contribution(args, status))
        .await?;
    println!(
        "#{} {} by {} ({})",
        committed.sequence,
        committed.declared_status,
        committed.worker_name,
        short_hash(&committed.hash)
    );
    Ok(Outcome::Done)
}

async fn block(store: &LedgerStore, args: &ArgMatches) -> Result<Outcome> {
    let task_id = task(args)?;
    let committed = store
        .block(task_id, new_contribution(args, ContributionStatus::Blocked))
        .await?;
    println!(
        "{task_id} blocked by {} (#{})",
        committed.worker_name, committed.sequence
    );
    Ok(Outcome::Done)
}

async fn transition(store: &LedgerStore, args: &ArgMatches) -> Result<Outcome> {
    let task_id = task(args)?;
    let to = args
        .get_one::<LedgerState>("state")
        .copied()
        .context("missing state")?;

    let ledger = store.update_state(task_id, to).await?;
    println!("{task_id} is now {}", ledger.state);
    Ok(Outcome::Done)
}

async fn verify(store: &LedgerStore, config: &RelayConfig, args: &ArgMatches) -> Result<Outcome> {
    let task_id = task(args)?;
    let mut settings = config.verifier.clone();
    if let Some(secs) = args.get_one::<u64>("timeout-secs") {
        settings.check_timeout_secs = *secs;
    }
    if let Some(dir) = args.get_one::<PathBuf>("workdir") {
        settings.workdir = Some(dir.clone());
    }

    let mut check = CommandCheck::new();
    if let Some(dir) = &settings.workdir {
        check = check.with_workdir(dir.clone());
    }
    let verifier = Verifier::from_config(Arc::new(check), &settings);

    let report = verifier.verify(store, task_id).await?;
    for outcome in &report.outcomes {
        let mut line = format!("{:<8} {}", outcome.status.as_str(), outcome.key);
        if let Some(value) = outcome.observed_value {
            let _ = write!(line, " (observed {value})");
        }
        if let Some(error) = &outcome.error {
            let _ = write!(line, ": {error}");
        }
        println!("{line}");
    }

    if report.all_met() {
        println!("all criteria met");
    } else {
        let unmet: Vec<String> = report.unmet.iter().map(ToString::to_string).collect();
        println!("unmet: {}", unmet.join(", "));
    }
    Ok(Outcome::Done)
}

async fn next(store: &LedgerStore, task_id: &TaskId) -> Result<Outcome> {
    let ledger = store.read(task_id).await?;
    match next_eligible(&ledger) {
        Ok(items) => {
            for item in items {
                println!("{item}");
            }
            Ok(Outcome::Done)
        }
        Err(e) => Ok(stalled(&e)),
    }
}

async fn plan(store: &LedgerStore, task_id: &TaskId) -> Result<Outcome> {
    let ledger = store.read(task_id).await?;
    match plan_waves(&ledger) {
        Ok(waves) => {
            for (i, wave) in waves.iter().enumerate() {
                println!("wave {}: {}", i + 1, wave.join(", "));
            }
            Ok(Outcome::Done)
        }
        Err(e) => Ok(stalled(&e)),
    }
}

fn stalled(err: &HandoffError) -> Outcome {
    eprintln!("{err}");
    Outcome::Stalled
}

async fn next_steps(store: &LedgerStore, args: &ArgMatches) -> Result<Outcome> {
    let task_id = task(args)?;
    let steps: Vec<String> = args
        .get_many::<String>("steps")
        .into_iter()
        .flatten()
        .cloned()
        .collect();

    let count = steps.len();
    store.set_next_steps(task_id, steps).await?;
    println!("{count} next step(s) recorded on {task_id}");
    Ok(Outcome::Done)
}

async fn question(store: &LedgerStore, args: &ArgMatches) -> Result<Outcome> {
    match args.subcommand() {
        Some(("add", sub)) => {
            let task_id = task(sub)?;
            if store.add_open_question(task_id, text(sub, "text")).await? {
                println!("question recorded on {task_id}");
            } else {
                println!("question already open on {task_id}");
            }
        }
        Some(("resolve", sub)) => {
            let task_id = task(sub)?;
            store.resolve_open_question(task_id, &text(sub, "text")).await?;
            println!("question resolved on {task_id}");
        }
        _ => bail!("expected `question add` or `question resolve`"),
    }
    Ok(Outcome::Done)
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn print_ledger(ledger: &Ledger) {
    println!("task:     {}", ledger.task_id);
    println!("state:    {}", ledger.state);
    println!("updated:  {}", ledger.updated_at.to_rfc3339());

    if !ledger.completion_criteria.is_empty() {
        println!("criteria:");
        for c in ledger.completion_criteria.values() {
            let threshold = c
                .threshold
                .map(|t| format!(" [{} {t}]", c.direction))
                .unwrap_or_default();
            let observed = c
                .observed_value
                .map(|v| format!(" observed {v}"))
                .unwrap_or_default();
            println!(
                "  {:<8} {}{threshold}{observed}  {}",
                c.status.as_str(),
                c.key,
                c.description
            );
        }
    }

    if !ledger.work_items.is_empty() {
        let done = ledger.completed_items();
        println!("items:");
        for item in &ledger.work_items {
            let mark = if done.contains(item.item_id.as_str()) { "x" } else { " " };
            let deps = if item.depends_on.is_empty() {
                String::new()
            } else {
                format!(" (after {})", item.depends_on.join(", "))
            };
            println!("  [{mark}] {}{deps}", item.item_id);
        }
    }

    if !ledger.contributions.is_empty() {
        println!("contributions:");
        for c in &ledger.contributions {
            let item = c.item_id.as_deref().map(|i| format!(" on {i}")).unwrap_or_default();
            println!(
                "  #{} {} {} {}{item}: {}",
                c.sequence,
                c.timestamp.format("%Y-%m-%d %H:%M:%S"),
                c.worker_name,
                c.declared_status,
                c.findings
            );
            if !c.handoff_notes.is_empty() {
                println!("      notes: {}", c.handoff_notes);
            }
        }
    }

    for q in &ledger.open_questions {
        println!("open question: {q}");
    }
    for (i, step) in ledger.next_steps.iter().enumerate() {
        println!("next {}: {step}", i + 1);
    }
}
