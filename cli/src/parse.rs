use stateful_core::BatchOp;

use crate::modules::Module;


/// Top-level `stfl` commands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { module: Module },
    Set { module: Module, json: String },
    Shell,
    Help,
}

/// One line typed into `stfl shell`.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Get { module: Module },
    Set { module: Module, json: String },
    Batch(BatchOp),
    Status,
    Help,
    Quit,
}


/// Parse CLI arguments (without the program name) into a Command.
pub fn parse_args(args: &[&str]) -> Result<Command, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'stfl help' for usage.".into());
    }

    match args[0] {
        "get" => parse_get(args).map(|module| Command::Get { module }),
        "set" => parse_set(args).map(|(module, json)| Command::Set { module, json }),
        "shell" => Ok(Command::Shell),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => Err(format!("Unknown command: '{}'", args[0])),
    }
}

/// Parse one shell line. Blank lines yield `None`.
pub fn parse_shell_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let args: Vec<&str> = match line.split_once(char::is_whitespace) {
        // Keep the JSON argument of `set` intact, spaces included.
        Some(("set", rest)) => match rest.trim().split_once(char::is_whitespace) {
            Some((module, json)) => vec!["set", module, json.trim()],
            None => vec!["set", rest.trim()],
        },
        _ => line.split_whitespace().collect(),
    };

    let cmd = match args[0] {
        "get" => ShellCommand::Get {
            module: parse_get(&args)?,
        },
        "set" => {
            let (module, json) = parse_set(&args)?;
            ShellCommand::Set { module, json }
        }
        "W" | "C" => ShellCommand::Batch(args[0].parse().map_err(|e| format!("{}", e))?),
        "status" => ShellCommand::Status,
        "help" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        other => return Err(format!("Unknown shell command: '{}'", other)),
    };
    Ok(Some(cmd))
}


// ---------------------------------------------------------------------------
// Sub-parsers
// ---------------------------------------------------------------------------

/// `get <module>`
fn parse_get(args: &[&str]) -> Result<Module, String> {
    if args.len() != 2 {
        return Err("Usage: get <module>".into());
    }
    args[1].parse()
}

/// `set <module> <json>`
fn parse_set(args: &[&str]) -> Result<(Module, String), String> {
    if args.len() < 3 {
        return Err("Usage: set <module> <json>".into());
    }
    let module = args[1].parse()?;
    Ok((module, args[2..].join(" ")))
}


pub const USAGE: &str = "\
Usage:
  stfl get <module>          print a module's state
  stfl set <module> <json>   apply a partial update and save it
  stfl shell                 interactive session with batched saves
  stfl help

Modules: lights, device

Shell commands:
  get <module>
  set <module> <json>
  W                          commit pending changes
  C                          cancel pending changes
  status                     list pending changes
  quit";
