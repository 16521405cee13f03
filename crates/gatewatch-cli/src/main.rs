use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gatewatch", about = "gatewatch camera gateway CLI")]
struct Cli {
    /// gatewatchd base URL
    #[arg(long, env = "GATEWATCH_SERVER", default_value = "http://127.0.0.1:5001")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run recognition on an image file
    Detect {
        image: PathBuf,
        /// Treat as an on-demand check (no alert cooldown)
        #[arg(long)]
        manual: bool,
    },
    /// Add a reference image for a known person
    Register {
        #[arg(short, long)]
        name: String,
        image: PathBuf,
    },
    /// Move the camera mount or switch the LED
    Control {
        #[arg(long, allow_negative_numbers = true)]
        pan: Option<i64>,
        #[arg(long, allow_negative_numbers = true)]
        tilt: Option<i64>,
        #[arg(long)]
        led: Option<OnOff>,
    },
    /// Show or change alerting on known persons
    AlertKnown { state: Option<OnOff> },
    /// Gallery and camera counts
    Stats,
    /// Daemon health and configured backends
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnOff {
    On,
    Off,
}

impl OnOff {
    fn as_bool(self) -> bool {
        matches!(self, Self::On)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let request = match cli.command {
        Commands::Detect { image, manual } => {
            let source = if manual { "manual" } else { "stream" };
            let form = Form::new()
                .text("source", source)
                .part("image", image_part(&image).await?);
            client.post(format!("{server}/detect")).multipart(form)
        }
        Commands::Register { name, image } => {
            let form = Form::new()
                .text("name", name)
                .part("image", image_part(&image).await?);
            client.post(format!("{server}/register")).multipart(form)
        }
        Commands::Control { pan, tilt, led } => {
            let body = control_body(pan, tilt, led);
            if body.as_object().map_or(true, |o| o.is_empty()) {
                bail!("nothing to do: pass --pan, --tilt or --led");
            }
            client.post(format!("{server}/control")).json(&body)
        }
        Commands::AlertKnown { state: None } => client.get(format!("{server}/settings/alert-known")),
        Commands::AlertKnown { state: Some(state) } => client
            .post(format!("{server}/settings/alert-known"))
            .json(&json!({ "enabled": state.as_bool() })),
        Commands::Stats => client.get(format!("{server}/stats")),
        Commands::Health => client.get(format!("{server}/health")),
    };

    let request = request.build()?;
    tracing::debug!(method = %request.method(), url = %request.url(), "sending request");
    let response = client
        .execute(request)
        .await
        .with_context(|| format!("cannot reach gatewatchd at {server}"))?;
    let status = response.status();
    let body: Value = response.json().await.context("invalid reply from gatewatchd")?;
    tracing::debug!(%status, "reply received");
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("gatewatchd answered {status}");
    }
    Ok(())
}

async fn image_part(path: &Path) -> Result<Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mime = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) {
        Some(ext) if ext == "png" => "image/png",
        _ => "image/jpeg",
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame.jpg".to_string());
    Ok(Part::bytes(bytes).file_name(file_name).mime_str(mime)?)
}

fn control_body(pan: Option<i64>, tilt: Option<i64>, led: Option<OnOff>) -> Value {
    let mut body = serde_json::Map::new();
    if let Some(pan) = pan {
        body.insert("pan".into(), json!(pan));
    }
    if let Some(tilt) = tilt {
        body.insert("tilt".into(), json!(tilt));
    }
    if let Some(led) = led {
        body.insert("led".into(), json!(led.as_bool()));
    }
    Value::Object(body)
}
