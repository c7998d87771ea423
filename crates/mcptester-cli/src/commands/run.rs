//! One-shot operations against a saved server.

use std::collections::BTreeMap;

use anyhow::Context;
use mcptester_core::Error;
use mcptester_mcp::protocol::{CompletionArgument, CompletionReference, LoggingLevel};
use mcptester_mcp::{McpError, Session, SessionOptions};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{AppContext, Operation, RunArgs};

pub async fn handle(args: RunArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let server = ctx
        .config
        .get_server(&args.server)
        .cloned()
        .ok_or_else(|| Error::NotFound(args.server.clone()))?;

    // Reject malformed operation input before spawning anything.
    let request = Request::try_from(args.operation)?;

    let session = Session::new(SessionOptions::from(&ctx.config));
    session
        .connect(server)
        .await
        .with_context(|| format!("failed to connect to '{}'", args.server))?;

    let outcome = execute(&session, request).await;
    if args.history {
        eprintln!("{}", session.export_history()?);
    }
    session.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}

/// A validated operation.
#[derive(Debug, PartialEq)]
enum Request {
    Ping,
    Capabilities,
    Tools(Option<String>),
    Call { tool: String, arguments: Value },
    Resources(Option<String>),
    Templates(Option<String>),
    Read(String),
    Subscribe(String),
    Unsubscribe(String),
    Prompts(Option<String>),
    Prompt {
        name: String,
        arguments: BTreeMap<String, String>,
    },
    Complete {
        reference: CompletionReference,
        argument: CompletionArgument,
    },
    SetLevel(LoggingLevel),
    Raw { method: String, params: Option<Value> },
}

impl TryFrom<Operation> for Request {
    type Error = anyhow::Error;

    fn try_from(operation: Operation) -> anyhow::Result<Self> {
        Ok(match operation {
            Operation::Ping => Self::Ping,
            Operation::Capabilities => Self::Capabilities,
            Operation::Tools { cursor } => Self::Tools(cursor),
            Operation::Call { tool, args } => {
                let arguments: Value =
                    serde_json::from_str(&args).context("--args must be valid JSON")?;
                if !arguments.is_object() {
                    anyhow::bail!("--args must be a JSON object");
                }
                Self::Call { tool, arguments }
            }
            Operation::Resources { cursor } => Self::Resources(cursor),
            Operation::Templates { cursor } => Self::Templates(cursor),
            Operation::Read { uri } => Self::Read(uri),
            Operation::Subscribe { uri } => Self::Subscribe(uri),
            Operation::Unsubscribe { uri } => Self::Unsubscribe(uri),
            Operation::Prompts { cursor } => Self::Prompts(cursor),
            Operation::Prompt { name, args } => Self::Prompt {
                name,
                arguments: args.into_iter().collect(),
            },
            Operation::Complete {
                prompt,
                resource,
                argument,
                value,
            } => {
                let reference = match (prompt, resource) {
                    (Some(name), _) => CompletionReference::Prompt { name },
                    (None, Some(uri)) => CompletionReference::Resource { uri },
                    (None, None) => anyhow::bail!("one of --prompt or --resource is required"),
                };
                Self::Complete {
                    reference,
                    argument: CompletionArgument {
                        name: argument,
                        value,
                    },
                }
            }
            Operation::SetLevel { level } => {
                Self::SetLevel(level.parse().map_err(anyhow::Error::msg)?)
            }
            Operation::Raw { method, params } => {
                let params = params
                    .map(|raw| serde_json::from_str(&raw))
                    .transpose()
                    .context("--params must be valid JSON")?;
                Self::Raw { method, params }
            }
        })
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, McpError> {
    Ok(serde_json::to_value(value)?)
}

async fn execute(session: &Session, request: Request) -> Result<Value, McpError> {
    match request {
        Request::Ping => {
            session.ping().await?;
            Ok(json!({"success": true}))
        }
        Request::Capabilities => Ok(json!({
            "serverInfo": session.server_info(),
            "capabilities": session.server_capabilities(),
        })),
        Request::Tools(cursor) => to_json(session.list_tools(cursor.as_deref()).await?),
        Request::Call { tool, arguments } => {
            to_json(session.call_tool(&tool, arguments, None).await?)
        }
        Request::Resources(cursor) => to_json(session.list_resources(cursor.as_deref()).await?),
        Request::Templates(cursor) => {
            to_json(session.list_resource_templates(cursor.as_deref()).await?)
        }
        Request::Read(uri) => to_json(session.read_resource(&uri).await?),
        Request::Subscribe(uri) => {
            session.subscribe_to_resource(&uri).await?;
            Ok(json!({"subscribed": uri}))
        }
        Request::Unsubscribe(uri) => {
            session.unsubscribe_from_resource(&uri).await?;
            Ok(json!({"unsubscribed": uri}))
        }
        Request::Prompts(cursor) => to_json(session.list_prompts(cursor.as_deref()).await?),
        Request::Prompt { name, arguments } => {
            to_json(session.get_prompt(&name, &arguments).await?)
        }
        Request::Complete {
            reference,
            argument,
        } => to_json(session.complete(reference, argument).await?),
        Request::SetLevel(level) => {
            session.set_logging_level(level).await?;
            Ok(json!({"level": level}))
        }
        Request::Raw { method, params } => session.request(&method, params).await,
    }
}
