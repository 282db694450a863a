use std::path::PathBuf;

use clap::Parser;

use face_screening::config::{StageConfig, StageKind};
use face_screening::server;

#[derive(Parser)]
#[command(
    name = "face-screening",
    about = "Runs one stage of the face-screening pipeline"
)]
struct Cli {
    /// Which pipeline stage this process serves.
    #[arg(long, value_enum)]
    stage: StageKind,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listening port; falls back to the PORT env var, then 8000.
    #[arg(long)]
    port: Option<u16>,

    /// Base URL of the next stage, e.g. http://age-screener:8000
    #[arg(long)]
    downstream: Option<String>,

    /// Root for temp inputs and annotated outputs.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = StageConfig {
        kind: cli.stage,
        host: cli.host,
        port: cli.port.unwrap_or_else(StageConfig::port_from_env),
        downstream_url: cli.downstream,
        data_dir: cli.data_dir,
    };
    actix_web::rt::System::new().block_on(server::startup(cfg))
}
