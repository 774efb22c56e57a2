//! `traymind status`: show runtime status.

use std::sync::Arc;

use traymind::Runtime;
use traymind_config::{AppConfig, ConfigStore};

pub async fn run(store: ConfigStore) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::with_defaults(Arc::new(store))?;
    let config = runtime.config.get();

    println!("Traymind Status");
    println!("===============");
    println!("  Config dir:    {}", AppConfig::config_dir().display());
    println!("  Log level:     {}", config.logging.level);
    println!("  Services:      {}", runtime.services.names().join(", "));
    println!("  Plugins:       {} discovered", runtime.plugins.discovered().len());
    println!("  Lazy loading:  {}", if config.plugins.lazy_load { "enabled" } else { "disabled" });
    println!("  Context:       {} messages max ({})", config.context.max_messages, config.context.pruning_strategy);
    let role_ids: Vec<&str> = config.roles.roles.iter().map(|r| r.id.as_str()).collect();
    println!("  Roles:         {} (default {})", role_ids.join(", "), config.roles.default_role_id);
    println!("  Undo history:  {} commands", config.commands.max_history);
    println!("  Stop timeout:  {} ms", config.events.stop_timeout_ms);
    match config.events.max_consecutive_same_priority {
        Some(max) => println!("  Fairness:      at most {max} same-priority events in a row"),
        None => println!("  Fairness:      strict priority order"),
    }

    if AppConfig::config_path().exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file; defaults in use (`traymind config default` prints one)");
    }

    Ok(())
}
