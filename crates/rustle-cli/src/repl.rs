//! Interactive REPL for `rustle agent`.

use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use rustle_agent::AgentLoop;

pub async fn run(agent: AgentLoop) -> Result<()> {
    crate::helpers::print_banner();
    println!("{}", "  /quit to exit, /reset to clear the session".dimmed());
    println!();

    let mut editor = DefaultEditor::new()?;

    loop {
        match editor.readline(&format!("{} ", "you ❯".green().bold())) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                match line {
                    "/quit" | "/exit" => break,
                    "/reset" => {
                        agent.sessions().clear("cli:direct");
                        println!("{}", "session cleared".dimmed());
                        continue;
                    }
                    _ => {}
                }

                match agent.process_direct(line).await {
                    Ok(response) => {
                        println!();
                        println!("{} {response}", "rustle ❯".cyan().bold());
                        println!();
                    }
                    Err(e) => eprintln!("{} {e}", "error:".red()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{} {e}", "readline error:".red());
                break;
            }
        }
    }

    println!("{}", "bye".dimmed());
    Ok(())
}
