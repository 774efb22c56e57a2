//! `traymind plugins`: discovered plugins and how they load.

use std::sync::Arc;

use traymind::Runtime;
use traymind_config::ConfigStore;

pub async fn run(store: ConfigStore) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::with_defaults(Arc::new(store))?;
    let settings = runtime.config.get().plugins;
    let entries = runtime.plugins.discovered();

    println!("Plugins ({} discovered, lazy loading {})", entries.len(), on_off(settings.lazy_load));
    println!();
    for entry in entries {
        let mode = if !settings.is_enabled(&entry.plugin_id) {
            "disabled"
        } else if entry.metadata.eager_load || !settings.lazy_load {
            "startup"
        } else {
            "on demand"
        };
        println!("  {:<16} v{:<8} {:<10} {}", entry.plugin_id, entry.metadata.version, mode, entry.metadata.description);
        println!("  {:<16} {}", "", entry.source);
    }
    Ok(())
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
