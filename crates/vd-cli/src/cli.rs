use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vd_core::{BatchReport, LayeredEngine, LayoutConfig, LayoutCoordinator, SyncMessage};
use vd_editor::{SessionRegistry, TurnOutcome};

#[derive(Parser, Debug)]
#[command(name = "vd", version, about = "Apply a voice turn's actions to a diagram")]
pub struct Args {
    /// Action batch as produced by the language model, or '-' for stdin
    pub actions: Option<PathBuf>,

    /// Previous sync message (.json or .msgpack)
    #[arg(short = 's', long = "state", conflicts_with = "snapshot")]
    pub state: Option<PathBuf>,

    /// Visual snapshot to reconcile instead of a sync message
    #[arg(long = "snapshot")]
    pub snapshot: Option<PathBuf>,

    /// Layout config JSON file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Write the new sync message here instead of embedding it in the output
    #[arg(short = 'o', long = "out-state")]
    pub out_state: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pub pretty: bool,
}

pub async fn run() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let coordinator = LayoutCoordinator::new(Arc::new(LayeredEngine::new(config.clone())), config);
    let registry = SessionRegistry::new(Arc::new(coordinator));
    let session = registry.open("cli");

    if let Some(path) = args.state.as_deref() {
        let message = read_message(path)?;
        session
            .load_message(&message)
            .await
            .context("laying out the previous state")?;
    } else if let Some(path) = args.snapshot.as_deref() {
        let text = read_text(path)?;
        let snapshot: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;
        session
            .load_snapshot(&snapshot)
            .await
            .context("laying out the snapshot")?;
    }

    let raw = read_actions(args.actions.as_deref())?;
    let outcome = session.apply_voice_turn(&raw).await?;
    let message = session.export_message().await;
    log::info!("{}", outcome.report.summary());

    let embedded = match args.out_state.as_deref() {
        Some(path) => {
            write_message(path, &message)?;
            None
        }
        None => Some(&message),
    };
    let output = render_output(&outcome, embedded)?;
    let text = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{text}");
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<LayoutConfig> {
    let Some(path) = path else {
        return Ok(LayoutConfig::default());
    };
    let text = read_text(path)?;
    LayoutConfig::from_json_str(&text).with_context(|| format!("loading {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_actions(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => read_text(path),
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading actions from stdin")?;
            Ok(buf)
        }
    }
}

fn is_msgpack(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| matches!(ext, "msgpack" | "mpk"))
}

fn read_message(path: &Path) -> Result<SyncMessage> {
    let message = if is_msgpack(path) {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        SyncMessage::from_msgpack(&bytes)
    } else {
        SyncMessage::from_json(&read_text(path)?)
    };
    message.with_context(|| format!("decoding {}", path.display()))
}

fn write_message(path: &Path, message: &SyncMessage) -> Result<()> {
    let bytes = if is_msgpack(path) {
        message.to_msgpack()?
    } else {
        message.to_json()?.into_bytes()
    };
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

fn render_output(
    outcome: &TurnOutcome<BatchReport>,
    message: Option<&SyncMessage>,
) -> Result<Value> {
    let mut output = json!({
        "summary": outcome.report.summary(),
        "applied": outcome.report.applied,
        "ignored": outcome.report.ignored(),
        "layout": serde_json::to_value(&outcome.layout)?,
        "stale": serde_json::to_value(&outcome.stale)?,
    });
    if let Some(message) = message {
        output["message"] = serde_json::to_value(message)?;
    }
    Ok(output)
}
