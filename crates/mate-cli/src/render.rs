//! Event output for the terminal

use mate_agent::AgentEvent;
use serde_json::Value;
use std::io::{self, Write};

/// How events reach stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Streamed text plus bracketed status lines
    Pretty,
    /// One JSON object per event, as sent over the wire
    Json,
}

pub struct Renderer {
    format: OutputFormat,
    mid_line: bool,
}

impl Renderer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            mid_line: false,
        }
    }

    pub fn render(&mut self, event: &AgentEvent) -> io::Result<()> {
        let mut out = io::stdout().lock();
        if self.format == OutputFormat::Json {
            writeln!(out, "{}", serde_json::to_string(event)?)?;
            return out.flush();
        }

        match event {
            AgentEvent::Text { delta } => {
                write!(out, "{}", delta)?;
                self.mid_line = !delta.ends_with('\n');
            }
            AgentEvent::Error { message } => {
                self.end_line(&mut out)?;
                eprintln!("Error: {}", message);
            }
            other => {
                self.end_line(&mut out)?;
                for line in status_lines(other) {
                    writeln!(out, "{}", line)?;
                }
            }
        }
        out.flush()
    }

    fn end_line(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.mid_line {
            writeln!(out)?;
            self.mid_line = false;
        }
        Ok(())
    }
}

/// Bracketed lines for a non-text event
fn status_lines(event: &AgentEvent) -> Vec<String> {
    match event {
        AgentEvent::ToolCall { name } => vec![format!("[Running {}...]", name)],
        AgentEvent::ToolResult { name } => vec![format!("[{} done]", name)],
        AgentEvent::AgentResponse {
            agent,
            input_tokens,
            output_tokens,
            ..
        } => vec![format!(
            "[{} answered: {} in, {} out]",
            agent, input_tokens, output_tokens
        )],
        AgentEvent::End {
            trails,
            order_by,
            input_tokens,
            output_tokens,
            cost,
            duration,
            ..
        } => {
            let mut lines = vec![];
            if !trails.is_empty() {
                let ordering = if order_by.is_empty() {
                    String::new()
                } else {
                    format!(" by {}", order_by)
                };
                lines.push(format!("[Trails{}]", ordering));
                lines.extend(trails.iter().map(|t| format!("  - {}", trail_label(t))));
            }
            lines.push(format!(
                "[Tokens: {} in, {} out | Cost: ${:.4} | {:.1}s]",
                input_tokens, output_tokens, cost, duration
            ));
            lines
        }
        AgentEvent::Text { .. } | AgentEvent::Error { .. } => vec![],
    }
}

fn trail_label(trail: &Value) -> String {
    ["name", "title", "trail_id", "id"]
        .iter()
        .find_map(|key| trail.get(*key))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| trail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_end_summary() {
        let lines = status_lines(&AgentEvent::End {
            message: "Two loops.".into(),
            trails: vec![json!({"trail_id": "t1", "name": "Tolmie Peak"}), json!({"trail_id": 7})],
            order_by: "popularity DESC".into(),
            input_tokens: 1200,
            output_tokens: 80,
            cost: 0.0012,
            duration: 3.5,
        });
        assert_eq!(
            lines,
            [
                "[Trails by popularity DESC]",
                "  - Tolmie Peak",
                "  - 7",
                "[Tokens: 1200 in, 80 out | Cost: $0.0012 | 3.5s]",
            ]
        );
    }

    #[test]
    fn test_tool_lines() {
        assert_eq!(
            status_lines(&AgentEvent::ToolCall {
                name: "handoff_to_agent".into()
            }),
            ["[Running handoff_to_agent...]"]
        );
        assert!(status_lines(&AgentEvent::Text { delta: "x".into() }).is_empty());
    }
}
