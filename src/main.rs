use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use variant_scout::conversation::EntryKind;
use variant_scout::preferences::PreferencePatch;
use variant_scout::{Concierge, Config};

const HELP: &str = "Commands:
  /search                run a search with the current preferences
  /set key=value ...     edit preferences (min_budget, max_budget, fuel_type, body_type,
                         transmission, seating, performance, brand, features=a,b)
  /shortlist <variant>   add or remove a variant from the shortlist
  /ask <question>        ask about the current results
  /prefs                 show current preferences
  /reset                 start over
  /quit                  exit
Anything else is sent as a chat message.";

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the transcript on stdout stays readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    let mut concierge =
        Concierge::from_config(&config).context("failed to initialise recommendation client")?;
    concierge.probe_health().await;

    let mut printed = print_new(&concierge, 0);
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        // Errors are already in the transcript; the result only matters for logs.
        let result = match command {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{HELP}");
                Ok(())
            }
            "/search" => concierge.submit_search().await.map(|_| ()),
            "/ask" => concierge.ask(rest).await,
            "/shortlist" if !rest.is_empty() => {
                if let Some(handle) = concierge.toggle_shortlist(rest) {
                    // Let the report go out before the next prompt; failures are logged inside.
                    if let Err(e) = handle.await {
                        tracing::debug!("Feedback task ended abnormally: {}", e);
                    }
                }
                println!("Shortlist: {}", concierge.state().shortlist().join(", "));
                Ok(())
            }
            "/set" => {
                match parse_patch(rest) {
                    Ok(patch) => {
                        concierge.update_preferences(&patch);
                    }
                    Err(e) => println!("{e}"),
                }
                print_preferences(&concierge)
            }
            "/prefs" => print_preferences(&concierge),
            "/reset" => {
                concierge.reset();
                printed = 0;
                Ok(())
            }
            _ => concierge.send_message(line).await,
        };
        if let Err(e) = result {
            tracing::debug!("Action finished with error: {}", e);
        }
        printed = print_new(&concierge, printed);
    }

    Ok(())
}

fn print_new(concierge: &Concierge, from: usize) -> usize {
    let entries = concierge.state().transcript().entries();
    for entry in entries.iter().skip(from) {
        match &entry.kind {
            EntryKind::UserText { .. } | EntryKind::SearchingIndicator => {}
            EntryKind::BotText { text, .. } => println!("scout> {text}"),
            EntryKind::Note { text } => println!("  ({text})"),
            EntryKind::AgentTrace { trace } => {
                let steps = trace.as_array().map(|a| a.len()).unwrap_or(0);
                if steps > 0 {
                    println!("  [pipeline trace: {steps} steps]");
                }
            }
            EntryKind::ResultsBlock { matches } => {
                for (i, m) in matches.iter().enumerate() {
                    match m.confidence() {
                        Some(c) => println!(
                            "  {}. {} score {:.1}, confidence {:.2}",
                            i + 1,
                            m.variant,
                            m.score,
                            c
                        ),
                        None => println!("  {}. {} score {:.1}", i + 1, m.variant, m.score),
                    }
                }
            }
        }
    }
    entries.len()
}

fn print_preferences(concierge: &Concierge) -> variant_scout::Result<()> {
    let prefs = concierge.state().store().preferences();
    println!("{}", serde_json::to_string_pretty(prefs)?);
    Ok(())
}

/// `key=value` pairs into a patch, reusing the lenient wire parsing.
fn parse_patch(input: &str) -> Result<PreferencePatch> {
    let mut map = serde_json::Map::new();
    for pair in input.split_whitespace() {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("expected key=value, got '{pair}'"))?;
        let value = if key == "features" {
            serde_json::Value::from(
                value
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.replace('_', " "))
                    .collect::<Vec<_>>(),
            )
        } else {
            serde_json::Value::from(value.replace('_', " "))
        };
        map.insert(key.to_string(), value);
    }
    serde_json::from_value(serde_json::Value::Object(map)).context("invalid preference values")
}
