//! devloop-ui server: HTTP status queries, a cycle trigger, SSE change events
//! and the interval timers of a long-running devloop.

mod routes;
mod schedule;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use devloop::app::build_engine;
use devloop::io::config::load_config;
use devloop::io::init::DevloopPaths;
use devloop::logging;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "devloop-ui")]
#[command(about = "HTTP and SSE front end for a devloop project")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Project directory (contains .devloop/)
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Serve the API only; do not start the interval timers
    #[arg(long)]
    no_schedule: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_with_default("devloop=info,devloop_ui=info");

    let args = Args::parse();

    let project_dir = args.project_dir.canonicalize().unwrap_or(args.project_dir);
    info!(project_dir = %project_dir.display(), "starting devloop-ui");

    let paths = DevloopPaths::new(&project_dir);
    let config = load_config(&paths.config_path).context("load config")?;
    // Plan generation may call the reasoner; keep it off the async workers.
    let engine = tokio::task::spawn_blocking({
        let project_dir = project_dir.clone();
        move || {
            let engine = build_engine(&project_dir)?;
            engine.send_startup_notice();
            anyhow::Ok(engine)
        }
    })
    .await
    .context("engine setup task")??;

    let state = AppState::new(paths, engine);
    sse::start_file_watcher(state.clone());
    if args.no_schedule {
        info!("interval timers disabled");
    } else {
        schedule::start(
            state.clone(),
            Duration::from_secs(config.schedule.cycle_interval_secs),
            Duration::from_secs(config.schedule.status_interval_secs),
        );
    }

    let app = routes::app(state);
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
