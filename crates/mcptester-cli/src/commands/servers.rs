//! Saved server management commands.

use anyhow::Context;
use mcptester_core::servers_file::McpServersFile;
use mcptester_core::{Error, ServerConfig};

use crate::{AddServerArgs, AppContext, ServersAction};

pub fn handle(action: ServersAction, ctx: &mut AppContext) -> anyhow::Result<()> {
    match action {
        ServersAction::List => list_servers(ctx),
        ServersAction::Show { name } => {
            let server = ctx
                .config
                .get_server(&name)
                .ok_or_else(|| Error::NotFound(name.clone()))?;
            println!("{}", serde_json::to_string_pretty(server)?);
        }
        ServersAction::Add(args) => {
            let server = server_from_args(args);
            for problem in server.problems() {
                println!("  ! {}", problem);
            }
            let name = ctx.config.add_server(server);
            save(ctx)?;
            println!("Saved server '{}'", name);
        }
        ServersAction::Remove { name } => {
            if !ctx.config.remove_server(&name) {
                return Err(Error::NotFound(name).into());
            }
            save(ctx)?;
            println!("Removed server '{}'", name);
        }
        ServersAction::Import { file } => {
            let servers = McpServersFile::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let count = ctx.config.import_servers(servers);
            save(ctx)?;
            println!("Imported {} server(s) from {}", count, file.display());
        }
        ServersAction::Export { file } => {
            ctx.config
                .export_servers()
                .write(&file)
                .with_context(|| format!("failed to write {}", file.display()))?;
            println!(
                "Exported {} server(s) to {}",
                ctx.config.servers.len(),
                file.display()
            );
        }
    }
    Ok(())
}

fn list_servers(ctx: &AppContext) {
    if ctx.config.servers.is_empty() {
        println!("No saved servers.");
        println!("Add one with: mcp-tester servers add <name> --command <cmd>");
        return;
    }

    println!("Saved servers ({}):", ctx.config.servers.len());
    println!();
    for server in &ctx.config.servers {
        let target = match (&server.command, &server.url) {
            (Some(command), _) if server.args.is_empty() => command.clone(),
            (Some(command), _) => format!("{} {}", command, server.args.join(" ")),
            (None, Some(url)) => url.clone(),
            (None, None) => "-".to_string(),
        };
        println!("  {:<20} {:<16} {}", server.label(), server.transport_type, target);
    }
}

fn server_from_args(args: AddServerArgs) -> ServerConfig {
    ServerConfig {
        name: Some(args.name),
        transport_type: args.transport,
        command: args.command,
        args: args.args,
        url: args.url,
        env: args.env.into_iter().collect(),
        headers: args.headers.into_iter().collect(),
        ..ServerConfig::default()
    }
}

fn save(ctx: &AppContext) -> anyhow::Result<()> {
    ctx.config
        .save_to(&ctx.config_path)
        .with_context(|| format!("failed to save {}", ctx.config_path.display()))?;
    tracing::debug!(path = %ctx.config_path.display(), "Saved configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcptester_core::Config;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> AppContext {
        AppContext {
            config: Config::default(),
            config_path: dir.path().join("config.toml"),
        }
    }

    fn add_args(name: &str) -> AddServerArgs {
        AddServerArgs {
            name: name.to_string(),
            transport: "stdio".to_string(),
            command: Some("node".to_string()),
            args: vec!["server.js".to_string()],
            url: None,
            env: vec![("DEBUG".to_string(), "1".to_string())],
            headers: Vec::new(),
        }
    }

    #[test]
    fn test_add_then_remove_persists() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);

        handle(ServersAction::Add(add_args("local")), &mut ctx).unwrap();
        let saved = Config::load_from(&ctx.config_path).unwrap();
        let server = saved.get_server("local").unwrap();
        assert_eq!(server.command.as_deref(), Some("node"));
        assert_eq!(server.env.get("DEBUG").map(String::as_str), Some("1"));

        handle(ServersAction::Remove { name: "local".to_string() }, &mut ctx).unwrap();
        let saved = Config::load_from(&ctx.config_path).unwrap();
        assert!(saved.servers.is_empty());
    }

    #[test]
    fn test_remove_unknown_fails() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let err = handle(ServersAction::Remove { name: "ghost".to_string() }, &mut ctx)
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_import_export_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        handle(ServersAction::Add(add_args("local")), &mut ctx).unwrap();

        let file = dir.path().join("servers.json");
        handle(ServersAction::Export { file: file.clone() }, &mut ctx).unwrap();

        let mut other = AppContext {
            config: Config::default(),
            config_path: dir.path().join("other.toml"),
        };
        handle(ServersAction::Import { file }, &mut other).unwrap();
        assert_eq!(other.config.servers, ctx.config.servers);
    }
}
