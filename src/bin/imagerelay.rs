//! CLI for ImageRelay - text-to-image request relay.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use imagerelay::image::credential_env_var;
use imagerelay::{EnvCredentials, HttpReply, Orchestrator, ProviderId, RelayConfig};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imagerelay")]
#[command(about = "Relay text-to-image requests to Stability, Imagen or Replicate")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an image from a text prompt
    Generate(GenerateArgs),

    /// Handle a raw request body (argument, or `-` for stdin)
    Request {
        /// JSON body
        #[arg(default_value = "-")]
        body: String,
    },

    /// List available providers
    Providers,
}

#[derive(Args)]
struct GenerateArgs {
    /// The text prompt describing the image
    prompt: String,

    /// Provider to use (stability, imagen, replicate)
    #[arg(short, long)]
    provider: Option<ProviderId>,

    /// Image width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Image height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Sampling steps
    #[arg(long)]
    steps: Option<u32>,

    /// Prompt guidance scale
    #[arg(long)]
    cfg_scale: Option<f64>,

    /// Aspect ratio, e.g. 16:9
    #[arg(long)]
    aspect_ratio: Option<String>,

    /// Things the image should avoid
    #[arg(long)]
    negative_prompt: Option<String>,
}

impl GenerateArgs {
    fn into_body(self) -> Value {
        let mut body = Map::new();
        body.insert("prompt".into(), json!(self.prompt));
        if let Some(p) = self.provider {
            body.insert("provider".into(), json!(p.as_str()));
        }
        if let Some(w) = self.width {
            body.insert("width".into(), json!(w));
        }
        if let Some(h) = self.height {
            body.insert("height".into(), json!(h));
        }
        if let Some(s) = self.steps {
            body.insert("steps".into(), json!(s));
        }
        if let Some(c) = self.cfg_scale {
            body.insert("cfgScale".into(), json!(c));
        }
        if let Some(ar) = self.aspect_ratio {
            body.insert("aspectRatio".into(), json!(ar));
        }
        if let Some(n) = self.negative_prompt {
            body.insert("negativePrompt".into(), json!(n));
        }
        Value::Object(body)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imagerelay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RelayConfig::default(),
    };
    let orchestrator = config.build_orchestrator(Arc::new(EnvCredentials::from_env()))?;

    match cli.command {
        Commands::Generate(args) => {
            let reply = handle(&orchestrator, &args.into_body()).await;
            print_reply(&reply, cli.json)?;
            if reply.status != 200 {
                std::process::exit(1);
            }
        }
        Commands::Request { body } => {
            let raw = read_body(&body).await?;
            // Malformed JSON is answered like any other invalid body.
            let value = serde_json::from_str(&raw).unwrap_or(Value::Null);
            let reply = handle(&orchestrator, &value).await;
            print_reply(&reply, true)?;
        }
        Commands::Providers => {
            list_providers(&orchestrator, cli.json)?;
        }
    }

    Ok(())
}

async fn handle(orchestrator: &Orchestrator, body: &Value) -> HttpReply {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });
    orchestrator.handle_with_cancel(body, &cancel).await
}

async fn read_body(arg: &str) -> anyhow::Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed to read request body from stdin")?;
    Ok(raw)
}

fn print_reply(reply: &HttpReply, json_output: bool) -> anyhow::Result<()> {
    if json_output {
        let out = json!({ "status": reply.status, "body": reply.body });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let body = reply.body.as_ref().unwrap_or(&Value::Null);
    match body.get("imageUrl").or_else(|| body.get("image")) {
        Some(Value::String(image)) => println!("{image}"),
        _ => {
            let error = body.get("error").and_then(Value::as_str).unwrap_or("error");
            match body.get("details").and_then(Value::as_str) {
                Some(details) => eprintln!("{} {error}: {details}", reply.status),
                None => eprintln!("{} {error}", reply.status),
            }
        }
    }
    Ok(())
}

fn list_providers(orchestrator: &Orchestrator, json_output: bool) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct ProviderInfo {
        name: &'static str,
        kind: ProviderId,
        mode: &'static str,
        env_var: &'static str,
        credential: bool,
        max_prompt_length: usize,
        default: bool,
    }

    let providers: Vec<_> = orchestrator
        .bindings()
        .map(|(id, binding)| ProviderInfo {
            name: id.display_name(),
            kind: id,
            mode: if binding.adapter().is_async() { "job" } else { "sync" },
            env_var: credential_env_var(id),
            credential: orchestrator.has_credential(id),
            max_prompt_length: binding.validator().max_prompt_length(),
            default: id == orchestrator.default_provider(),
        })
        .collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&providers)?);
    } else {
        println!("Available providers:\n");
        for p in &providers {
            let status = if p.credential { "✓" } else { "✗" };
            let default = if p.default { " [default]" } else { "" };
            println!("  {} {} ({}, {}){}", status, p.name, p.kind, p.mode, default);
            println!("    API key: {}", p.env_var);
            println!("    Max prompt: {} chars", p.max_prompt_length);
        }
    }

    Ok(())
}
