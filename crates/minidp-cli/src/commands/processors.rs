use anyhow::Result;

use minidp_engine::registry;

/// Execute the `list-processors` command.
pub fn execute() -> Result<()> {
    let entries = registry::global().list();

    if entries.is_empty() {
        println!("No processors registered.");
        return Ok(());
    }

    println!("Available processors:");
    for (name, summary) in entries {
        println!("  {name}: {summary}");
    }

    Ok(())
}
