//! `stfl shell`: a line-oriented session over the engine.
//!
//! The session acts like one transport connection. Its own changes are not
//! echoed back to it; changes from any other origin (such as the reverts
//! made by a cancel) are printed as `notify <module> <origin>`.

use std::io::{self, BufRead, Write};
use std::sync::mpsc;

use stateful_core::{BatchOp, FlushReport};

use crate::engine::Engine;
use crate::parse::{parse_shell_line, ShellCommand, USAGE};


pub fn run_shell<R: BufRead, W: Write>(
    engine: &Engine,
    input: R,
    out: &mut W,
    origin_id: &str,
) -> io::Result<()> {
    let (tx, rx) = mpsc::channel::<String>();
    let own = origin_id.to_string();
    let handles = engine.subscribe(move |module, origin| {
        if origin != own {
            let _ = tx.send(format!("notify {} {}", module, origin));
        }
    });

    let outcome = session(engine, input, out, origin_id, &rx);
    engine.unsubscribe(&handles);
    outcome?;

    let pending = engine.pending();
    if !pending.is_empty() {
        writeln!(out, "warning: {} uncommitted change(s) discarded", pending.len())?;
    }
    Ok(())
}

fn session<R: BufRead, W: Write>(
    engine: &Engine,
    input: R,
    out: &mut W,
    origin_id: &str,
    notifications: &mpsc::Receiver<String>,
) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        let cmd = match parse_shell_line(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "error: {}", e)?;
                continue;
            }
        };

        match cmd {
            ShellCommand::Quit => break,
            ShellCommand::Help => writeln!(out, "{}", USAGE)?,
            ShellCommand::Get { module } => match engine.get(module) {
                Ok(json) => writeln!(out, "{}", json)?,
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            ShellCommand::Set { module, json } => match engine.set(module, &json, origin_id) {
                Ok(result) => writeln!(out, "{}", result)?,
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            ShellCommand::Batch(op) => {
                let report = engine.batch(op);
                write_report(out, &report)?;
            }
            ShellCommand::Status => {
                let pending = engine.pending();
                if pending.is_empty() {
                    writeln!(out, "pending: none")?;
                }
                for path in pending {
                    writeln!(out, "pending: {}", path)?;
                }
            }
        }

        for note in notifications.try_iter() {
            writeln!(out, "{}", note)?;
        }
        out.flush()?;
    }
    Ok(())
}

fn write_report<W: Write>(out: &mut W, report: &FlushReport) -> io::Result<()> {
    let verb = match report.op {
        BatchOp::Commit => "committed",
        BatchOp::Cancel => "cancelled",
    };
    writeln!(out, "{} {}", verb, report.flushed.len())?;
    for (path, err) in &report.failures {
        writeln!(out, "error: {}: {}", path, err)?;
    }
    Ok(())
}
