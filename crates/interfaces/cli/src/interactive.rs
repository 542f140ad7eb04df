use std::io::{self, BufRead, IsTerminal, Write};

use gitsmart_memory::{Enhancement, MemoryRecord};
use gitsmart_runtime::{Decision, ReviewDecider};

pub(crate) fn can_prompt() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

/// Print `prompt` and read one trimmed line.  EOF reads as an empty line.
pub(crate) fn prompt_line(prompt: &str) -> io::Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Multi-line entry terminated by an empty line.
pub(crate) fn prompt_block(prompt: &str) -> io::Result<String> {
    println!("{prompt}");
    let stdin = io::stdin();
    let mut lines = Vec::new();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            break;
        }
        lines.push(line);
    }
    Ok(lines.join("\n").trim().to_string())
}

/// Asks the person at the terminal to accept, edit or decline a suggestion.
pub(crate) struct TerminalReviewer;

impl ReviewDecider for TerminalReviewer {
    fn decide(&mut self, draft: &MemoryRecord, suggestion: &Enhancement) -> Decision {
        println!();
        println!("── suggested context for {} ──────────────────────", draft.id_short());
        for line in suggestion.render().lines() {
            println!("  {line}");
        }
        println!();

        loop {
            let answer = match prompt_line("[a]ccept, [e]dit, [d]ecline? ") {
                Ok(answer) => answer.to_ascii_lowercase(),
                Err(err) => {
                    eprintln!("cannot read answer ({err}); declining suggestion");
                    return Decision::Decline;
                }
            };
            match answer.as_str() {
                "" | "a" | "accept" | "y" | "yes" => return Decision::Accept,
                "d" | "decline" | "n" | "no" => return Decision::Decline,
                "e" | "edit" => {
                    return match prompt_block("Enter the reasoning (finish with an empty line):") {
                        Ok(text) if !text.is_empty() => Decision::Edit(text),
                        Ok(_) => Decision::Decline,
                        Err(err) => {
                            eprintln!("cannot read text ({err}); declining suggestion");
                            Decision::Decline
                        }
                    };
                }
                _ => println!("please answer a, e or d"),
            }
        }
    }
}
