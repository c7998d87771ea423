//! Diagnostic command to check configuration and saved servers.

use std::path::Path;

use mcptester_core::Config;

pub fn run(explicit: Option<&Path>, config_path: &Path) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    let config_dir = Config::config_dir();
    println!("Config directory: {:?}", config_dir);
    if config_dir.exists() {
        println!("  ✓ Exists");
    } else {
        println!("  ✗ Does not exist (will be created on first save)");
    }

    println!("\nConfig file: {:?}", config_path);
    if config_path.exists() {
        println!("  ✓ Exists");
    } else {
        println!("  ✗ Does not exist (defaults are used)");
    }

    let loaded = match explicit {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => {
            println!("  ✓ Parsed");
            config
        }
        Err(e) => {
            println!("  ✗ Failed to parse: {}", e);
            println!("\nDiagnostics complete.");
            return Ok(());
        }
    };

    println!("\nSettings:");
    println!("  timeout:     {}ms", config.timeout);
    println!("  max history: {}", config.max_history);

    let result = config.validate();
    if result.issues.is_empty() {
        println!("  ✓ No problems found");
    }
    for issue in result.errors() {
        println!("  ✗ {}: {}", issue.field, issue.message);
    }
    for issue in result.warnings() {
        println!("  ! {}: {}", issue.field, issue.message);
    }

    println!("\nSaved servers:");
    if config.servers.is_empty() {
        println!("  (none)");
    }
    for server in &config.servers {
        let problems = server.problems();
        if problems.is_empty() {
            println!("  ✓ {} ({})", server.label(), server.transport_type);
        } else {
            println!("  ✗ {} ({})", server.label(), server.transport_type);
            for problem in problems {
                println!("      {}", problem);
            }
        }
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
