use anyhow::Result;
use bat::WrappingMode;
use console::{style, Term};
use kbchat::conversation::ConnectionStatus;
use kbchat::render::{RenderItem, ToolView, View};
use serde_json::Value;

const MAX_STRING_LENGTH: usize = 60;
const INDENT: &str = "    ";
const THEME: &str = "zenburn";

/// Draws the conversation to the terminal, from the top, on every redraw
pub struct TerminalView {
    term: Term,
    status: ConnectionStatus,
    last_error: Option<String>,
}

impl TerminalView {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
            status: ConnectionStatus::Disconnected,
            last_error: None,
        }
    }

    /// Print a render list below whatever is already on screen
    pub fn print(&self, items: &[RenderItem]) -> Result<()> {
        for item in items {
            match item {
                RenderItem::User { content } => {
                    println!("{} {}", style("You:").cyan().bold(), content);
                }
                RenderItem::Loading { content } => {
                    println!("{}", style(content).dim().italic());
                }
                RenderItem::Error { content } => {
                    println!("{}", style(content).red());
                }
                RenderItem::AgentMessage { content, .. } => {
                    print_markdown(content)?;
                }
                RenderItem::Tool(tool) => {
                    println!("{}", tool_line(tool));
                    if let Some(details) = &tool.details {
                        for line in detail_lines(details, 1) {
                            println!("{}", line);
                        }
                    }
                }
            }
            println!();
        }
        Ok(())
    }
}

impl Default for TerminalView {
    fn default() -> Self {
        Self::new()
    }
}

impl View for TerminalView {
    fn draw(&mut self, items: &[RenderItem]) {
        if let Err(e) = self.term.clear_screen() {
            tracing::warn!("Failed to clear the terminal: {}", e);
        }
        if let Err(e) = self.print(items) {
            tracing::warn!("Failed to draw the conversation: {}", e);
        }
        for line in status_lines(self.status, self.last_error.as_deref()) {
            println!("{}", line);
        }
    }

    fn status(&mut self, status: ConnectionStatus, last_error: Option<&str>) {
        self.status = status;
        self.last_error = last_error.map(str::to_string);
    }
}

/// `● connected`, followed by the last error while one is set
pub fn status_lines(status: ConnectionStatus, last_error: Option<&str>) -> Vec<String> {
    let dot = match status {
        ConnectionStatus::Connected => style("●").green(),
        ConnectionStatus::Connecting => style("●").yellow(),
        ConnectionStatus::Error => style("●").red(),
        ConnectionStatus::Disconnected => style("●").dim(),
    };
    let mut lines = vec![format!("{} {}", dot, style(status).dim())];
    if let Some(error) = last_error {
        lines.push(format!(
            "{} {}  {}",
            style("Error:").red().bold(),
            error,
            style("(/clear-error to dismiss)").dim()
        ));
    }
    lines
}

fn print_markdown(content: &str) -> Result<()> {
    bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .theme(THEME)
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print()?;
    println!();
    Ok(())
}

/// `🔍 retrieve  ✅ Done`
pub fn tool_line(tool: &ToolView) -> String {
    format!(
        "{} {}  {}",
        tool.icon,
        style(&tool.name).magenta().bold(),
        style(tool.indicator).dim()
    )
}

/// Lay out a tool payload as indented `key: value` lines
pub fn detail_lines(value: &Value, depth: usize) -> Vec<String> {
    let indent = INDENT.repeat(depth);
    let mut lines = Vec::new();

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        lines.push(format!("{}{}:", indent, style(key).dim()));
                        lines.extend(detail_lines(val, depth + 1));
                    }
                    _ => lines.push(format!("{}{}: {}", indent, style(key).dim(), scalar(val))),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        lines.push(format!("{}-", indent));
                        lines.extend(detail_lines(item, depth + 1));
                    }
                    _ => lines.push(format!("{}- {}", indent, scalar(item))),
                }
            }
        }
        _ => lines.push(format!("{}{}", indent, scalar(value))),
    }
    lines
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => style(truncate(s)).green().to_string(),
        Value::Number(n) => style(n).blue().to_string(),
        Value::Bool(b) => style(b).blue().to_string(),
        Value::Null => style("null").dim().to_string(),
        other => other.to_string(),
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_STRING_LENGTH {
        let head: String = s.chars().take(MAX_STRING_LENGTH).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
