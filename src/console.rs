//! Interactive console bound to the hook service
//!
//! The console is a trusted input surface: commands map straight onto
//! service operations, and every failure is a printed status line, never a
//! crash.

use anyhow::Result;
use chrono::{Local, TimeZone};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::hooks::ActionKind;
use crate::service::HookService;

/// Run the REPL until `quit` or EOF
pub async fn run(service: &HookService) -> Result<()> {
    println!(
        "hookd v{} | {} hook(s) registered",
        env!("CARGO_PKG_VERSION"),
        service.registry().len()
    );
    println!("Type 'help' for commands, 'quit' to exit\n");

    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("hookd> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                match handle_command(line, service).await {
                    CommandResult::Continue => {}
                    CommandResult::Quit => break,
                    CommandResult::Error(e) => eprintln!("Error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    println!("Goodbye!");
    Ok(())
}

enum CommandResult {
    Continue,
    Quit,
    Error(String),
}

async fn handle_command(input: &str, service: &HookService) -> CommandResult {
    let parts: Vec<&str> = input.split_whitespace().collect();

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "help" | "h" | "?" => {
            println!("\nCommands:");
            println!("  run <hookId>.<kind> <subjectId> [...args]          - Execute immediately");
            println!("  run <hookId>.<kind> <subjectId> <delay> [...args]  - Schedule after <delay> seconds");
            println!("  cancel <actionId>                                  - Cancel a scheduled action");
            println!("  hooks                                              - List registered hooks");
            println!("  stats                                              - Show registry/scheduler stats");
            println!("  cleanup                                            - Sweep stale scheduled actions");
            println!("  quit, exit, q                                      - Exit\n");
            CommandResult::Continue
        }

        "hooks" => {
            let hooks = service.registry().get_all();
            if hooks.is_empty() {
                println!("\nNo hooks registered.\n");
                return CommandResult::Continue;
            }
            println!();
            let mut ids: Vec<_> = hooks.keys().collect();
            ids.sort();
            for id in ids {
                let hook = &hooks[id];
                let kinds: Vec<_> = hook
                    .handled_kinds()
                    .iter()
                    .map(|kind| kind.as_str())
                    .collect();
                println!("  {} - {} [{}]", hook.id, hook.label, kinds.join(", "));
            }
            println!();
            CommandResult::Continue
        }

        "stats" => {
            let stats = service.stats();
            println!("\nHooks registered:   {}", stats.total_hooks);
            println!("Scheduled actions:  {}", stats.scheduled_actions);
            if !stats.per_hook.is_empty() {
                println!("Per hook:");
                for (hook_id, count) in &stats.per_hook {
                    println!("  {hook_id}: {count}");
                }
            }
            if !stats.per_kind.is_empty() {
                println!("Per action kind:");
                for (kind, count) in &stats.per_kind {
                    println!("  {kind}: {count}");
                }
            }
            if let Some(oldest) = &stats.oldest {
                println!(
                    "Oldest: {} ({}, created {})",
                    oldest.id,
                    oldest.hook_id,
                    format_ms(oldest.created_ms)
                );
            }
            if let Some(newest) = &stats.newest {
                println!(
                    "Newest: {} ({}, due {})",
                    newest.id,
                    newest.hook_id,
                    format_ms(newest.execute_at_ms)
                );
            }
            println!();
            CommandResult::Continue
        }

        "cleanup" => {
            let removed = service.cleanup();
            println!("\nRemoved {removed} stale scheduled action(s).\n");
            CommandResult::Continue
        }

        "cancel" => {
            if parts.len() != 2 {
                return CommandResult::Error("Usage: cancel <actionId>".into());
            }
            if service.cancel(parts[1]) {
                println!("\nCancelled {}.\n", parts[1]);
            } else {
                println!("\nNo scheduled action with id {}.\n", parts[1]);
            }
            CommandResult::Continue
        }

        "run" => match parse_run(&parts[1..]) {
            Ok(RunSpec::Immediate {
                hook_id,
                kind,
                subject_id,
                args,
            }) => {
                let (result, error) = service.execute(&hook_id, kind, &subject_id, &args).await;
                match (&result.success, &error) {
                    (true, _) => println!(
                        "\nOK: {}\n",
                        result.message.as_deref().unwrap_or("completed")
                    ),
                    (false, Some(e)) => println!("\nFailed: {e}\n"),
                    (false, None) => println!(
                        "\nFailed: {} (retry={})\n",
                        result.message.as_deref().unwrap_or("handler reported failure"),
                        result.retry
                    ),
                }
                CommandResult::Continue
            }
            Ok(RunSpec::Deferred {
                hook_id,
                kind,
                subject_id,
                args,
                delay_secs,
            }) => match service.schedule(&hook_id, kind, &subject_id, args, delay_secs, None) {
                Ok(action_id) => {
                    println!("\nScheduled {action_id} in {delay_secs}s.\n");
                    CommandResult::Continue
                }
                Err(e) => CommandResult::Error(e.to_string()),
            },
            Err(usage) => CommandResult::Error(usage),
        },

        other => CommandResult::Error(format!(
            "unknown command '{other}' (type 'help' for commands)"
        )),
    }
}

/// Parsed form of a `run` command
#[derive(Debug, PartialEq)]
enum RunSpec {
    Immediate {
        hook_id: String,
        kind: ActionKind,
        subject_id: String,
        args: Vec<String>,
    },
    Deferred {
        hook_id: String,
        kind: ActionKind,
        subject_id: String,
        args: Vec<String>,
        delay_secs: f64,
    },
}

const RUN_USAGE: &str = "Usage: run <hookId>.<kind> <subjectId> [delaySeconds] [...args]";

/// Parse the tokens after `run`. A first extra token that parses as a
/// finite number is the schedule delay; everything after it is handler args.
fn parse_run(tokens: &[&str]) -> Result<RunSpec, String> {
    if tokens.len() < 2 {
        return Err(RUN_USAGE.to_string());
    }

    let (hook_id, kind_str) = tokens[0]
        .split_once('.')
        .ok_or_else(|| RUN_USAGE.to_string())?;
    if hook_id.is_empty() {
        return Err(RUN_USAGE.to_string());
    }
    let kind = ActionKind::parse(kind_str)
        .ok_or_else(|| format!("unknown action kind '{kind_str}' (purchase/remove/renew)"))?;
    let subject_id = tokens[1].to_string();

    let rest = &tokens[2..];
    if let Some(first) = rest.first()
        && let Ok(delay_secs) = first.parse::<f64>()
        && delay_secs.is_finite()
    {
        return Ok(RunSpec::Deferred {
            hook_id: hook_id.to_string(),
            kind,
            subject_id,
            args: rest[1..].iter().map(|s| s.to_string()).collect(),
            delay_secs,
        });
    }

    Ok(RunSpec::Immediate {
        hook_id: hook_id.to_string(),
        kind,
        subject_id,
        args: rest.iter().map(|s| s.to_string()).collect(),
    })
}

fn format_ms(ms: u64) -> String {
    match Local.timestamp_millis_opt(ms as i64) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => format!("{ms}ms"),
    }
}
