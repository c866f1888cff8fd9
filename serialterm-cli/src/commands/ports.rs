//! Port listing and hot-plug watching.

use anyhow::{Context, Result};
use console::style;
use log::warn;
use serialterm::{PortDescriptor, PortRegistry, best_candidate, format_port_list};
use std::time::Duration;

use crate::{Cli, sleep_interruptible, use_fancy_output, was_interrupted};

/// Polling period of `list-ports --watch`.
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Ports that appeared or disappeared between two polls.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PortChanges<'a> {
    pub(crate) added: Vec<&'a PortDescriptor>,
    pub(crate) removed: Vec<&'a PortDescriptor>,
}

impl PortChanges<'_> {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compare two snapshots by device path.
pub(crate) fn diff_ports<'a>(
    previous: &'a [PortDescriptor],
    current: &'a [PortDescriptor],
) -> PortChanges<'a> {
    PortChanges {
        added: current
            .iter()
            .filter(|p| !previous.iter().any(|q| q.path == p.path))
            .collect(),
        removed: previous
            .iter()
            .filter(|p| !current.iter().any(|q| q.path == p.path))
            .collect(),
    }
}

fn enumerate(registry: &PortRegistry, all: bool) -> serialterm::Result<Vec<PortDescriptor>> {
    if all {
        registry.list_all_ports()
    } else {
        registry.list_ports()
    }
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(cli: &Cli, registry: &PortRegistry, json: bool, watch: bool) -> Result<()> {
    if watch {
        return watch_ports(cli, registry, json);
    }

    let ports = enumerate(registry, cli.list_all_ports).context("Failed to enumerate serial ports")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for label in format_port_list(&ports) {
        eprintln!("  {} {label}", style("•").green());
    }

    if let Some(best) = best_candidate(&ports) {
        eprintln!(
            "\n{} Suggested: {}",
            style("→").green().bold(),
            style(&best.path).cyan().bold()
        );
    }

    Ok(())
}

fn watch_ports(cli: &Cli, registry: &PortRegistry, json: bool) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Watching for serial ports (Ctrl+C to stop)",
            if use_fancy_output() { "👀" } else { "*" }
        );
    }

    let mut known: Vec<PortDescriptor> = Vec::new();

    while !was_interrupted() {
        match enumerate(registry, cli.list_all_ports) {
            Ok(current) => {
                let changes = diff_ports(&known, &current);
                if !changes.is_empty() {
                    report_changes(&changes, json)?;
                }
                known = current;
            },
            // Transient: retry on the next poll
            Err(e) => warn!("{e}"),
        }

        sleep_interruptible(WATCH_INTERVAL);
    }

    Ok(())
}

fn report_changes(changes: &PortChanges<'_>, json: bool) -> Result<()> {
    if json {
        for port in &changes.added {
            println!(
                "{}",
                serde_json::json!({ "event": "added", "port": port })
            );
        }
        for port in &changes.removed {
            println!(
                "{}",
                serde_json::json!({ "event": "removed", "port": port })
            );
        }
        return Ok(());
    }

    for port in &changes.added {
        eprintln!("  {} {}", style("+").green().bold(), port.label());
    }
    for port in &changes.removed {
        eprintln!("  {} {}", style("-").red().bold(), port.label());
    }
    Ok(())
}
