//! One-shot send command.

use anyhow::Result;
use console::style;
use log::debug;
use serialterm::{PortRegistry, SerialSession};
use std::io::{self, Write as _};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, connect_session, get_port, resolve_baud, sleep_interruptible};

/// Send each line in `text` to the device, then print whatever arrives
/// during `wait`.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &mut Config,
    registry: &PortRegistry,
    text: &[String],
    wait: Duration,
) -> Result<()> {
    let port = get_port(cli, config, registry)?;
    let baud = resolve_baud(cli.baud, config);

    let mut session = SerialSession::native();

    // First write failure, surfaced after the session is closed
    let write_error: Arc<Mutex<Option<String>>> = Arc::default();
    {
        let write_error = Arc::clone(&write_error);
        session.on_error(move |err| {
            write_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert_with(|| err.to_string());
        });
    }
    session.on_data(|line| {
        println!("{}", line.strip_suffix('\r').unwrap_or(line));
        io::stdout().flush().ok();
    });

    connect_session(&mut session, &port, baud)?;
    debug!("Connected to {port} at {baud} baud");

    let sent = text
        .iter()
        .take_while(|line| session.send(line))
        .count();

    if sent == text.len() && !wait.is_zero() {
        sleep_interruptible(wait);
    }

    if let Err(e) = session.disconnect() {
        debug!("Disconnect reported: {e}");
    }

    if sent < text.len() {
        let cause = write_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| "write failed".to_string());
        return Err(CliError::Device(cause).into());
    }

    if !cli.quiet {
        eprintln!(
            "{} Sent {} to {}",
            style("✓").green().bold(),
            describe_count(sent),
            style(&port).cyan()
        );
    }
    Ok(())
}

fn describe_count(lines: usize) -> String {
    if lines == 1 {
        "1 line".to_string()
    } else {
        format!("{lines} lines")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_count() {
        assert_eq!(describe_count(0), "0 lines");
        assert_eq!(describe_count(1), "1 line");
        assert_eq!(describe_count(3), "3 lines");
    }
}
