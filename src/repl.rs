//! Interactive REPL.

use crate::commands::{format_json, format_report, format_status, load_model, parse_event};
use colored::Colorize;
use rstchart_core::{Executor, ExecutorConfig, Model};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::path::Path;
use std::sync::Arc;

const HELP_TEXT: &str = r#"
Available commands:
  help                      Show this help

  send <event> [payload]    Submit an event (payload is JSON)
  status                    Show the active configuration
  data                      Show the data model
  reports                   Show and clear diagnostics
  restart                   Start a fresh session of the chart

  quit, exit                Exit the REPL
"#;

struct Session {
    model: Arc<Model>,
    config: ExecutorConfig,
    executor: Executor,
}

impl Session {
    fn start(model: Arc<Model>, config: ExecutorConfig) -> Result<(Self, String), Box<dyn std::error::Error>> {
        let mut executor = Executor::new(model.clone()).with_config(config.clone());
        let status = executor.start()?;
        let banner = format!(
            "session {} {}",
            executor.session_id().to_string().dimmed(),
            format_status(&status)
        );
        Ok((
            Self {
                model,
                config,
                executor,
            },
            banner,
        ))
    }
}

pub fn run(document: &Path, config: ExecutorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let model = load_model(document)?;
    println!(
        "{} {} (checksum: {})",
        "rstchart".bold().cyan(),
        model.name().cyan(),
        model.checksum()
    );

    let (mut session, banner) = Session::start(model, config)?;
    println!("{}", banner);

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = home::home_dir()
        .map(|h| h.join(".rstchart_history"))
        .unwrap_or_else(|| ".rstchart_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "rstchart>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&mut session, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

fn execute_repl_command(
    session: &mut Session,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
        None => (line.to_lowercase(), ""),
    };

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "send" | "s" => {
            if rest.is_empty() {
                return Ok(Some("Usage: send <event> [payload_json]".to_string()));
            }
            let event = match rest.split_once(char::is_whitespace) {
                Some((name, payload)) => parse_event(&format!("{}={}", name, payload))?,
                None => parse_event(rest)?,
            };
            let status = session.executor.submit_event(event)?;
            let mut lines = vec![format_status(&status)];
            lines.extend(session.executor.take_reports().iter().map(format_report));
            Ok(Some(lines.join("\n")))
        }

        "status" | "st" => {
            let status = session.executor.status();
            Ok(Some(format!(
                "{}\nactive: {}\nphase: {:?}",
                format_status(&status),
                status.active.join(", "),
                status.phase
            )))
        }

        "data" | "d" => Ok(Some(format_json(&session.executor.data().to_value()))),

        "reports" | "r" => {
            let reports = session.executor.take_reports();
            if reports.is_empty() {
                return Ok(Some("No reports".dimmed().to_string()));
            }
            Ok(Some(
                reports.iter().map(format_report).collect::<Vec<_>>().join("\n"),
            ))
        }

        "restart" => {
            let (fresh, banner) = Session::start(session.model.clone(), session.config.clone())?;
            *session = fresh;
            Ok(Some(banner))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for available commands.",
            cmd
        ))),
    }
}
