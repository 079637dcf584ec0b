//! Handling of one shell line.

use std::io::{self, Write};
use std::sync::Arc;

use conduit_agent::Orchestrator;
use conduit_core::VendorKind;
use conduit_mcp::SessionRegistry;
use tracing::debug;

/// Result of handling one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    /// Continue the REPL loop
    Continue,
    /// Exit the REPL
    Exit,
}

/// What a line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Blank,
    Quit,
    Logs,
    Query(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        Input::Blank
    } else if line.eq_ignore_ascii_case("quit") {
        Input::Quit
    } else if line.eq_ignore_ascii_case("logs") {
        Input::Logs
    } else {
        Input::Query(line)
    }
}

/// The shell's collaborators: the vendor loop and the provider sessions.
pub struct Shell {
    orchestrator: Box<dyn Orchestrator>,
    registry: Arc<SessionRegistry>,
    logs_uri: String,
}

impl Shell {
    pub fn new(
        orchestrator: Box<dyn Orchestrator>,
        registry: Arc<SessionRegistry>,
        logs_uri: String,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            logs_uri,
        }
    }

    pub fn vendor(&self) -> VendorKind {
        self.orchestrator.vendor()
    }

    /// Handle one line, writing whatever it produces to `out`.
    ///
    /// Only a failing `out` is an error; turn failures are printed.
    pub async fn handle_line<W: Write>(&self, line: &str, out: &mut W) -> io::Result<CommandResult> {
        match classify(line) {
            Input::Blank => {}
            Input::Quit => return Ok(CommandResult::Exit),
            Input::Logs => self.show_logs(out).await?,
            Input::Query(query) => {
                debug!(vendor = %self.vendor(), "Processing query");
                match self.orchestrator.process_query(query).await {
                    Ok(answer) => writeln!(out, "\n{}", answer)?,
                    Err(e) => writeln!(out, "\nError: {}", e)?,
                }
            }
        }
        Ok(CommandResult::Continue)
    }

    /// Read the log resource from every provider.
    async fn show_logs<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.registry.is_empty() {
            writeln!(out, "\nNo tool providers connected.")?;
            return Ok(());
        }

        for session in self.registry.sessions() {
            match session.read_resource(&self.logs_uri).await {
                Ok(contents) => writeln!(out, "\n[{}]\n{}", session.name(), contents.text())?,
                Err(e) => writeln!(out, "\n[{}] Error: {}", session.name(), e)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use conduit_agent::TurnError;
    use conduit_mcp::testing::{MockConnector, ScriptedProvider};

    use super::*;

    struct Echo {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Orchestrator for Echo {
        fn vendor(&self) -> VendorKind {
            VendorKind::Anthropic
        }

        async fn process_query(&self, query: &str) -> Result<String, TurnError> {
            self.queries.lock().unwrap().push(query.to_string());
            if query == "fail" {
                Err(TurnError::RoundLimit(20))
            } else {
                Ok(format!("echo: {}", query))
            }
        }
    }

    async fn shell(providers: Vec<ScriptedProvider>) -> Shell {
        let mut raw = String::from(r#"{"mcpServers": {"#);
        let entries: Vec<String> = providers
            .iter()
            .map(|p| format!(r#""{}": {{"type": "sse", "url": "http://localhost:8000/sse"}}"#, p.server_name))
            .collect();
        raw.push_str(&entries.join(","));
        raw.push_str("}}");

        let connector = providers
            .into_iter()
            .fold(MockConnector::new(), |c, p| c.with_provider(p));
        let configs = SessionRegistry::load_config(&raw).unwrap();
        let mut registry = SessionRegistry::with_connector(Arc::new(connector));
        registry.create_sessions(&configs).await;

        let echo = Echo {
            queries: Mutex::new(Vec::new()),
        };
        Shell::new(
            Box::new(echo),
            Arc::new(registry),
            "file:///logs/app.log".to_string(),
        )
    }

    async fn run(shell: &Shell, line: &str) -> (CommandResult, String) {
        let mut out = Vec::new();
        let result = shell.handle_line(line, &mut out).await.unwrap();
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("   "), Input::Blank);
        assert_eq!(classify("QUIT"), Input::Quit);
        assert_eq!(classify(" Logs "), Input::Logs);
        assert_eq!(classify(" weather in CA? "), Input::Query("weather in CA?"));
    }

    #[tokio::test]
    async fn test_quit_any_case() {
        let shell = shell(vec![]).await;
        assert_eq!(run(&shell, "Quit").await.0, CommandResult::Exit);
    }

    #[tokio::test]
    async fn test_blank_line_is_ignored() {
        let shell = shell(vec![]).await;
        assert_eq!(run(&shell, "").await, (CommandResult::Continue, String::new()));
    }

    #[tokio::test]
    async fn test_query_prints_answer() {
        let shell = shell(vec![]).await;
        let (result, out) = run(&shell, "hello").await;
        assert_eq!(result, CommandResult::Continue);
        assert_eq!(out, "\necho: hello\n");
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_shell_running() {
        let shell = shell(vec![]).await;
        let (result, out) = run(&shell, "fail").await;
        assert_eq!(result, CommandResult::Continue);
        assert!(out.starts_with("\nError: stopped after 20 tool rounds"));
    }

    #[tokio::test]
    async fn test_logs_reads_every_provider() {
        let shell = shell(vec![
            ScriptedProvider::new("weather").with_resource("file:///logs/app.log", "started"),
            ScriptedProvider::new("calc"),
        ])
        .await;

        let (_, out) = run(&shell, "logs").await;

        assert!(out.contains("[weather]\nstarted"));
        assert!(out.contains("[calc] Error: "));
    }

    #[tokio::test]
    async fn test_logs_without_providers() {
        let shell = shell(vec![]).await;
        let (_, out) = run(&shell, "logs").await;
        assert_eq!(out, "\nNo tool providers connected.\n");
    }
}
