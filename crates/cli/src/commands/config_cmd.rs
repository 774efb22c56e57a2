//! `traymind config`: configuration management commands.

use traymind_config::{AppConfig, ConfigStore};

pub async fn show(store: ConfigStore) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&store.get())?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

pub async fn default() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if config.events.max_consecutive_same_priority == Some(0) {
                warnings.push("events.max_consecutive_same_priority = 0 behaves like 1");
            }
            if config.context.pruning_strategy != "fifo" {
                warnings.push("Unknown context.pruning_strategy, fifo will be used");
            }
            if config.roles.find(&config.roles.default_role_id).is_none() {
                warnings.push("roles.default_role_id is not a configured role, the first role will be used");
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Priorities:  {} prefixes", config.events.priorities.len());
            println!("   Context:     {} messages ({})", config.context.max_messages, config.context.pruning_strategy);
            println!("   Plugins:     lazy_load = {}", config.plugins.lazy_load);
            println!("   Roles:       {}", config.roles.roles.len());
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn config_path_is_valid() {
        let path = traymind_config::AppConfig::config_path();
        assert!(path.to_str().unwrap().contains("config.toml"));
    }
}
