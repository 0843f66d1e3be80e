//! Reads a `TRANSCRIPT_DUMP|i/N|<json>` chunk sequence from stdin or a
//! log file given as the first argument, reassembles it via
//! `voice_agent_server::post_call::reassemble_chunks`, and
//! pretty-prints the conversation in call order.
//!
//! Carries no business logic of its own — every line the dump
//! produces here is exactly what `voice-agent-server` wrote.

use std::io::Read;

use voice_agent_core::session::TranscriptRole;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let input = read_input()?;

    let lines: Vec<String> = input
        .lines()
        .filter(|line| line.contains("TRANSCRIPT_DUMP|"))
        .map(|line| {
            // Log lines may carry a timestamp/level prefix before the
            // marker; keep only the marker onward.
            let idx = line.find("TRANSCRIPT_DUMP|").unwrap();
            line[idx..].to_string()
        })
        .collect();

    if lines.is_empty() {
        eprintln!("no TRANSCRIPT_DUMP lines found in input");
        std::process::exit(1);
    }

    let entries = voice_agent_server::post_call::reassemble_chunks(&lines).ok_or("failed to reassemble transcript chunks")?;

    for entry in entries {
        let prefix = format!("[{:>7.1}s]", entry.t);
        match entry.role {
            TranscriptRole::User => println!("{prefix} Caller: {}", entry.content.as_deref().unwrap_or("")),
            TranscriptRole::Agent => println!("{prefix} Agent:  {}", entry.content.as_deref().unwrap_or("")),
            TranscriptRole::Tool => println!(
                "{prefix} [tool {}] -> {}",
                entry.name.as_deref().unwrap_or("?"),
                entry.result.as_ref().map(|r| r.to_string()).unwrap_or_default()
            ),
        }
    }

    Ok(())
}

fn read_input() -> std::io::Result<String> {
    match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}
