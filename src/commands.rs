//! Command execution.

use crate::Commands;
use colored::Colorize;
use rstchart_core::{
    Action, ActionContext, ActionError, ActionRegistry, ChartDocument, ErrorReport, Event,
    Executor, ExecutorConfig, Model, ReportKind, Status,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Namespace of the actions the CLI provides to charts.
pub const CLI_NAMESPACE: &str = "urn:rstchart:cli";

/// Writes a line to stdout: the value of `expr` if given, else `text`.
#[derive(Debug, Deserialize)]
struct Print {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    expr: Option<String>,
}

impl Action for Print {
    fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let line = match &self.expr {
            Some(expr) => match ctx.evaluate(expr)? {
                Value::String(s) => s,
                other => other.to_string(),
            },
            None => self.text.clone().unwrap_or_default(),
        };
        println!("{} {}", ">".dimmed(), line);
        Ok(())
    }
}

/// The registry every CLI command builds charts against.
pub fn registry() -> Result<ActionRegistry, Box<dyn std::error::Error>> {
    let mut registry = ActionRegistry::new();
    registry.register_action::<Print>(CLI_NAMESPACE, "print")?;
    Ok(registry)
}

pub fn load_model(path: &Path) -> Result<Arc<Model>, Box<dyn std::error::Error>> {
    let doc = ChartDocument::from_file(path)?;
    let model = Model::build(&doc, &registry()?)?;
    Ok(Arc::new(model))
}

/// Executes a one-shot command and returns the formatted output.
pub fn execute(
    cmd: Commands,
    config: ExecutorConfig,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl { .. } => Err("repl is interactive; run it directly".into()),

        Commands::Check { document } => {
            let model = load_model(&document)?;
            Ok(format!(
                "{} chart {} ({} states, checksum: {})",
                "Valid".green(),
                model.name().cyan(),
                model.len(),
                model.checksum()
            ))
        }

        Commands::Run { document, events } => {
            let model = load_model(&document)?;
            let mut executor = Executor::new(model).with_config(config);
            let mut output = Vec::new();

            let status = executor.start()?;
            output.push(format!("{} {}", "start".bold(), format_status(&status)));
            output.extend(executor.take_reports().iter().map(format_report));

            for arg in events {
                let event = parse_event(&arg)?;
                let name = event.name.clone();
                let status = executor.submit_event(event)?;
                output.push(format!("{} {}", name.bold(), format_status(&status)));
                output.extend(executor.take_reports().iter().map(format_report));
            }

            Ok(output.join("\n"))
        }
    }
}

/// Parses `name` or `name=<json>`.
pub fn parse_event(arg: &str) -> Result<Event, serde_json::Error> {
    match arg.split_once('=') {
        Some((name, payload)) => Ok(Event::with_data(name.trim(), serde_json::from_str(payload)?)),
        None => Ok(Event::new(arg.trim())),
    }
}

pub fn format_status(status: &Status) -> String {
    let states = status.states.join(", ");
    let mut line = if status.is_final {
        format!("[{}] {}", states.yellow(), "final".green())
    } else {
        format!("[{}]", states.yellow())
    };
    if let Some(data) = &status.done_data {
        line.push_str(&format!(" done_data={}", data));
    }
    line
}

pub fn format_report(report: &ErrorReport) -> String {
    let label = match report.kind {
        ReportKind::Warning => "warning".yellow(),
        ReportKind::Expression => "expression error".red(),
        ReportKind::Action => "action error".red(),
    };
    match &report.state {
        Some(state) => format!("  {} in {}: {}", label, state.cyan(), report.message),
        None => format!("  {}: {}", label, report.message),
    }
}

pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
