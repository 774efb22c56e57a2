//! `traymind run`: interactive or single-message chat on the console.
//!
//! Stands in for the tray front end: typed lines become
//! `AGENT_EVENT.QUERY_RECEIVED`, streamed chunks are printed as they arrive.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use traymind::Runtime;
use traymind_config::ConfigStore;
use traymind_core::event::{Listener, Payload, topics};
use traymind_plugins::builtin::screen_capture;

pub async fn run(store: ConfigStore, message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::with_defaults(Arc::new(store))?;
    let mut completions = attach_console(&runtime);
    let summary = runtime.start().await?;

    if let Some(msg) = message {
        // Single message mode
        ask(&runtime, &mut completions, &msg).await?;
        runtime.shutdown().await;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Traymind: Interactive Mode");
    println!();
    println!("  Plugins:   {} loaded, {} on demand", summary.loaded.len(), summary.deferred.len());
    println!("  Commands:  /clear  /capture  /branches  /exit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/exit" | "exit" => break,
            "/clear" => {
                runtime.events.publish(topics::CLEAR_CONTEXT, Payload::new());
                println!("  Conversation cleared.");
            }
            "/capture" => match runtime.plugins.get_plugin(screen_capture::PLUGIN_ID).await {
                Ok(_) => {
                    runtime.events.publish(topics::SCREEN_CAPTURE, Payload::new());
                    println!("  Capturing screen; it will be attached to your next message.");
                }
                Err(e) => eprintln!("  [Error] {e}"),
            },
            "/branches" => print_branches(&runtime),
            query => ask(&runtime, &mut completions, query).await?,
        }
        prompt()?;
    }

    runtime.shutdown().await;
    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Print streamed chunks and errors; completions come back on the channel.
fn attach_console(runtime: &Runtime) -> mpsc::UnboundedReceiver<String> {
    runtime.events.subscribe(
        topics::RESPONSE_CHUNK,
        Listener::sync(|event| {
            if let Some(chunk) = event.payload.str("chunk") {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            }
            Ok(())
        }),
    );
    runtime.events.subscribe(
        topics::NOTIFY_ERROR,
        Listener::sync(|event| {
            let title = event.payload.str("title").unwrap_or("Error");
            let message = event.payload.str("message").unwrap_or_default();
            eprintln!("\n  [{title}] {message}");
            Ok(())
        }),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    runtime.events.subscribe(
        topics::REQUEST_COMPLETE,
        Listener::sync(move |event| {
            let full = event.payload.str("full_response").unwrap_or_default();
            let _ = tx.send(full.to_string());
            Ok(())
        }),
    );
    rx
}

async fn ask(
    runtime: &Runtime,
    completions: &mut mpsc::UnboundedReceiver<String>,
    query: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    print!("  Assistant > ");
    std::io::stdout().flush()?;
    runtime.events.publish(
        topics::QUERY_RECEIVED,
        Payload::new().kwarg("user_message", query),
    );
    completions
        .recv()
        .await
        .ok_or("event bus closed before the reply completed")?;
    println!();
    println!();
    Ok(())
}

fn print_branches(runtime: &Runtime) {
    let current = runtime.context.current_node_id();
    let branches = runtime.context.get_branches();
    println!("  {} branch(es), current node {current}", branches.len());
    for (i, branch) in branches.iter().enumerate() {
        let marker = if branch.iter().any(|m| m.id == current) { "*" } else { " " };
        let tip = branch
            .last()
            .map(|m| m.message.content.text().chars().take(40).collect::<String>())
            .unwrap_or_default();
        println!("  {marker} [{i}] {} messages, ends with: {tip}", branch.len());
    }
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}
