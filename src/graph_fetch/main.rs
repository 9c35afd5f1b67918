use clap::Parser;
use kapadokya::errors::{EngineError, EngineResult};
use kapadokya::road_graph::builder::{self, URGUP_REGION};
use std::path::PathBuf;

/// Geofabrik extract covering Cappadocia.
const DEFAULT_EXTRACT_URL: &str =
    "https://download.geofabrik.de/europe/turkey/ic-anadolu-latest.osm.pbf";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Download an OSM extract and build the road graph snapshots"
)]
struct Args {
    /// Local extract file; downloaded here when absent
    #[arg(long, default_value = "./urgup.osm.pbf")]
    extract: PathBuf,

    /// Where to download the extract from
    #[arg(long, default_value = DEFAULT_EXTRACT_URL)]
    url: String,

    /// Skip the download even if the extract file is missing
    #[arg(long)]
    offline: bool,

    /// Snapshot output directory; defaults to GRAPH_SNAPSHOT_DIR
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

async fn run(args: Args) -> EngineResult<()> {
    let snapshot_dir = args.snapshot_dir.unwrap_or_else(|| {
        std::env::var("GRAPH_SNAPSHOT_DIR")
            .unwrap_or_else(|_| kapadokya::config::DEFAULT_GRAPH_SNAPSHOT_DIR.to_string())
            .into()
    });

    if !args.extract.exists() {
        if args.offline {
            return Err(EngineError::InvalidInput(format!(
                "extract {:?} missing and --offline given",
                args.extract
            )));
        }
        builder::download_extract(&args.url, &args.extract).await?;
    } else {
        log::info!("reusing existing extract {:?}", args.extract);
    }

    builder::build_all_from_file(&args.extract, &snapshot_dir, &URGUP_REGION)?;
    println!("snapshots written to {:?}", snapshot_dir);
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{}: {}", e.category(), e);
        std::process::exit(e.exit_code());
    }
}
