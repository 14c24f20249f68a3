/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use colored::Colorize;
use shakedown::{
    clap_args,
    cluster::{ComponentKind, TopologySnapshot},
    config::{self, Config},
    job::{JobCoordinator, JobSpec},
    operator::ScenarioKind,
    script, HarnessContext,
};
use std::{path::Path, sync::Arc};
use term_table::{row, row::Row, rows, table_cell::*, Table, TableStyle};
use tokio_util::sync::CancellationToken;
use tracing::{subscriber::set_global_default, Subscriber};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = clap_args::parse();
    let default_level = if args.verbose { "debug" } else { "warn" };
    init_subscriber(get_subscriber(default_level.into()));

    match args.command {
        clap_args::Commands::Init => {
            config::init_config();
        }

        clap_args::Commands::Topology => {
            let config = Config::try_from_path(Path::new(&args.config))?;
            let context = HarnessContext::new(config)?;
            let snapshot = context
                .discovery
                .discover()
                .await
                .context("Topology discovery failed")?;
            print_topology(&snapshot);
        }

        clap_args::Commands::Run {
            scenario,
            component,
            items,
        } => {
            let config = Config::try_from_path(Path::new(&args.config))?;
            let context = HarnessContext::new(config)?;
            run_scenario(context, &scenario, component.as_deref(), items).await?;
        }
    }

    Ok(())
}

async fn run_scenario(
    context: HarnessContext,
    scenario: &str,
    component: Option<&str>,
    items: Vec<String>,
) -> anyhow::Result<()> {
    let kind = ScenarioKind::try_from_tag(scenario)?;
    let component = match component {
        Some(name) => Some(ComponentKind::try_from_str(name)?),
        None => None,
    };
    let items = expand_selection(&context, kind, component, items).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    ctrlc::set_handler(move || interrupt.cancel())
        .context("Unable to install the interrupt handler")?;

    let spec = JobSpec::new(kind, component, items);
    let total = spec.items.len();
    println!(
        "> running {} over {} item(s), results under {}",
        kind.tag().green(),
        total,
        context.config.results.root
    );

    let mut channels = JobCoordinator::new(Arc::new(context), cancel).start(spec);

    let mut problems = 0;
    let mut outcome = None;
    loop {
        tokio::select! {
            Some(done) = channels.progress.recv() => {
                println!("{}", format!("> {}/{} item(s) complete", done, total).cyan());
            }
            Some(line) = channels.log.recv() => {
                println!("{}", line);
            }
            Some(err) = channels.error.recv() => {
                problems += 1;
                println!("{} {:#}", "[error]".red(), err);
            }
            Some(ok) = channels.complete.recv() => {
                outcome = Some(ok);
            }
            else => break,
        }
    }

    println!("\n{}", " Summary ".reversed().green());
    match outcome {
        Some(true) if problems == 0 => {
            println!("{} finished cleanly", kind.tag().green());
        }
        Some(true) => {
            println!(
                "{} finished with {} reported problem(s)",
                kind.tag().yellow(),
                problems
            );
        }
        _ => {
            println!("{} did not complete", kind.tag().red());
        }
    }
    Ok(())
}

/// An empty selection means every matching item: the whole script catalog
/// for script scenarios, every instance of the component for fault
/// scenarios. Label values for the disaster scenario are resolved inside
/// the job, where the snapshot is already at hand.
async fn expand_selection(
    context: &HarnessContext,
    kind: ScenarioKind,
    component: Option<ComponentKind>,
    items: Vec<String>,
) -> anyhow::Result<Vec<String>> {
    if !items.is_empty() {
        return Ok(items);
    }

    if matches!(
        kind,
        ScenarioKind::Script | ScenarioKind::OtherScript | ScenarioKind::SafetyScript
    ) {
        let scripts = script::catalog(context.config.scripts.dir.as_deref())?;
        return Ok(scripts.into_iter().map(|script| script.name).collect());
    }

    if kind.is_component_targeted() {
        let component = component.context(format!(
            "Scenario {} needs a component kind, pass one with -k",
            kind.tag()
        ))?;
        let snapshot = context
            .discovery
            .discover()
            .await
            .context("Topology discovery failed")?;
        return Ok(snapshot
            .instances(component)
            .iter()
            .map(|instance| instance.address())
            .collect());
    }

    Ok(items)
}

fn print_topology(snapshot: &TopologySnapshot) {
    let mut rows = rows![row![
        TableCell::builder("Component".bold()).build(),
        TableCell::builder("Address".bold()).build(),
        TableCell::builder("Status port".bold()).build(),
        TableCell::builder("Labels".bold()).build(),
        TableCell::builder("Deploy path".bold()).build()
    ]];

    for kind in ComponentKind::all() {
        for instance in snapshot.instances(kind) {
            let mut labels: Vec<String> = instance
                .labels
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect();
            labels.sort();

            rows.push(row![
                TableCell::new(kind.as_str()),
                TableCell::new(instance.display_address()),
                TableCell::new(
                    instance
                        .status_port
                        .map(|port| port.to_string())
                        .unwrap_or("--".to_string())
                ),
                TableCell::new(labels.join(",")),
                TableCell::new(&instance.deploy_path)
            ]);
        }
    }

    let table = Table::builder()
        .rows(rows)
        .style(TableStyle::rounded())
        .build();
    println!("{}", table.render());
    println!("{} instance(s) discovered", snapshot.total_instances());
}

fn get_subscriber(env_filter: String) -> impl Subscriber + Sync + Send {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish()
}

fn init_subscriber(subscriber: impl Subscriber + Sync + Send) {
    set_global_default(subscriber).expect("Failed to set subscriber");
}
