//! Interactive session.
//!
//! Keeps one unlocked session alive between commands. Every command counts
//! as activity; an auto-lock is reported as soon as it happens, even while
//! waiting for input.

use anyhow::{Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::{match_id, print_entry, print_summaries, prompt_password, short_id, App};
use passbox_vault::{EntryInput, LockReason, SessionState};

const HELP: &str = "\
Commands:
  list                          list all entries
  search <query>                search titles, usernames and urls
  show <id>                     show an entry with the secret masked
  reveal <id>                   show an entry including the secret
  add <title> <username> [url]  add an entry (secret is prompted)
  rm <id>                       remove an entry
  timeout <ms>                  set the inactivity timeout
  lock                          lock now
  unlock                        unlock again
  help                          show this text
  quit                          leave the shell";

/// Run the interactive loop until `quit` or end of input.
pub(crate) async fn run(app: &App) -> Result<()> {
    app.unlock().await?;
    let timeout = app.session.config().await.inactivity_timeout_ms();
    println!(
        "Vault unlocked. Auto-lock after {} ms of inactivity. Type `help` for commands.",
        timeout
    );

    let mut status = app.session.subscribe();
    status.mark_unchanged();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt()?;
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match execute(app, line.trim()).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(e) => println!("Error: {:#}", e),
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                if current.state == SessionState::Locked
                    && current.lock_reason == Some(LockReason::Timeout)
                {
                    println!();
                    println!("Vault locked after inactivity. Type `unlock` to continue.");
                }
            }
        }
    }

    if app.session.lock(LockReason::Manual).await {
        debug!("Locked on shell exit");
    }
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

fn prompt() -> Result<()> {
    print!("passbox> ");
    std::io::stdout().flush()?;
    Ok(())
}

async fn execute(app: &App, line: &str) -> Result<Flow> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Flow::Continue);
    };
    let args: Vec<&str> = words.collect();

    let session = &app.session;
    session.record_activity().await;

    match command {
        "quit" | "exit" => return Ok(Flow::Quit),
        "help" => println!("{}", HELP),
        "unlock" => {
            if session.is_unlocked() {
                println!("Already unlocked.");
            } else {
                let password = prompt_blocking("Master password: ").await?;
                if session.unlock(&password).await? {
                    println!("Unlocked.");
                } else {
                    println!("Wrong master password.");
                }
            }
        }
        "lock" => {
            session.lock(LockReason::Manual).await;
            println!("Locked.");
        }
        "timeout" => {
            let ms = args
                .first()
                .context("Usage: timeout <ms>")?
                .parse::<u64>()
                .context("Timeout must be a number of milliseconds")?;
            session.set_inactivity_timeout_ms(ms).await?;
            println!("Inactivity timeout set to {} ms", ms);
        }
        _ if !session.is_unlocked() => {
            println!("Vault is locked. Type `unlock` first.");
        }
        "list" => print_summaries(&session.summaries().await),
        "search" => print_summaries(&session.search(&args.join(" ")).await),
        "show" | "reveal" => {
            let id = match_id(&session.summaries().await, args.first().context("Usage: show <id>")?)?;
            let entry = session.entry(id).await.context("Entry not found")?;
            print_entry(&entry, command == "reveal");
        }
        "add" => {
            let (title, username) = match args.as_slice() {
                [title, username, ..] => (*title, *username),
                _ => anyhow::bail!("Usage: add <title> <username> [url]"),
            };
            let secret = prompt_blocking("Secret: ").await?;
            let mut input = EntryInput::new(title, username, secret.as_str());
            if let Some(url) = args.get(2) {
                input = input.with_url(*url);
            }
            let entry = session.create_entry(input).await?;
            println!("Entry added: {} ({})", entry.title, short_id(&entry.id));
        }
        "rm" => {
            let id = match_id(&session.summaries().await, args.first().context("Usage: rm <id>")?)?;
            session.delete_entry(id).await?;
            println!("Entry removed: {}", short_id(&id));
        }
        other => println!("Unknown command `{}`. Type `help` for commands.", other),
    }
    Ok(Flow::Continue)
}

/// Prompt on the terminal without stalling the runtime.
async fn prompt_blocking(label: &'static str) -> Result<zeroize::Zeroizing<String>> {
    tokio::task::spawn_blocking(move || prompt_password(label))
        .await
        .context("Prompt task failed")?
}
