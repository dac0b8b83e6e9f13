use anyhow::Context;
use gate_timer::{runtime, ConfigError, GateTimer, TimerConfig};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the event stream, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg_path = resolve_config_path();
    let cfg = match TimerConfig::load(&cfg_path) {
        Ok(cfg) => cfg,
        Err(ConfigError::Read { path, source }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("no config at {}; using defaults", path.display());
            TimerConfig::default()
        }
        Err(e) => return Err(e).with_context(|| format!("loading {}", cfg_path.display())),
    };
    tracing::info!(
        "loaded config enter={} exit={} drone_size={} calib_samples={}",
        cfg.enter_rssi,
        cfg.exit_rssi,
        cfg.drone_size.code(),
        cfg.calib_samples
    );

    let timer = Arc::new(Mutex::new(GateTimer::new(cfg)));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let printer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            match serde_json::to_string(&ev) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("failed to encode event: {}", e),
            }
        }
    });

    let commands = Box::pin(runtime::json_lines(BufReader::new(tokio::io::stdin())));
    runtime::run(timer.clone(), commands, tx).await;
    printer.await.context("event printer panicked")?;

    let cfg = timer.lock().to_config();
    cfg.save(&cfg_path)
        .with_context(|| format!("saving {}", cfg_path.display()))?;
    tracing::info!("saved thresholds enter={} exit={} to {}", cfg.enter_rssi, cfg.exit_rssi, cfg_path.display());
    Ok(())
}

fn resolve_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("GATE_CONFIG") {
        return PathBuf::from(p);
    }

    let candidates = [
        PathBuf::from("config/gate.json"),
        PathBuf::from("./config/gate.json"),
        {
            let mut p = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
            p.pop(); // exe dir
            p.push("config/gate.json");
            p
        },
    ];

    for c in candidates {
        if c.exists() {
            return c;
        }
    }

    // Nothing found; defaults are used and saved here on exit
    PathBuf::from("config/gate.json")
}
