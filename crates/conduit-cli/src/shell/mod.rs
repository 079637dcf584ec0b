//! Line-oriented REPL.
//!
//! `quit` exits, `logs` reads the providers' log resource, anything else is
//! sent to the model. A failed turn prints its error and the loop goes on.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use conduit_mcp::StartupReport;

mod commands;

pub use commands::{CommandResult, Shell};

const PROMPT: &str = "\nQuery: ";

/// Run the interactive loop until `quit`, Ctrl-D or a terminal error.
pub async fn run(shell: &Shell, report: &StartupReport) -> anyhow::Result<()> {
    print_welcome_banner(shell, report);

    let mut editor = DefaultEditor::new()?;
    let history = history_file();
    if let Some(path) = &history {
        // Missing on first run
        editor.load_history(path).ok();
    }

    let mut stdout = io::stdout();
    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Terminal error: {err}");
                break;
            }
        };

        let line = line.trim();
        if !line.is_empty() {
            editor.add_history_entry(line).ok();
        }
        if let CommandResult::Exit = shell.handle_line(line, &mut stdout).await? {
            break;
        }
        stdout.flush()?;
    }

    if let Some(path) = &history {
        persist_history(&mut editor, path);
    }

    Ok(())
}

fn persist_history(editor: &mut DefaultEditor, path: &Path) {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    if let Err(err) = editor.save_history(path) {
        tracing::debug!(path = %path.display(), error = %err, "Could not save history");
    }
}

fn print_welcome_banner(shell: &Shell, report: &StartupReport) {
    println!();
    println!("Conduit {} ({})", env!("CARGO_PKG_VERSION"), shell.vendor());
    if report.connected.is_empty() {
        println!("No tool providers connected.");
    } else {
        println!("Connected providers: {}", report.connected.join(", "));
    }
    for (name, err) in &report.failed {
        println!("Unavailable: {} ({})", name, err);
    }
    println!("Type your queries, 'logs' for provider logs, or 'quit' to exit.");
}

/// `<data dir>/conduit/history.txt`; no history without a data dir.
fn history_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("conduit").join("history.txt"))
}
