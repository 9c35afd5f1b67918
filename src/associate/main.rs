use clap::Parser;
use kapadokya::associations::{self, AssociationParams};
use kapadokya::config::Config;
use kapadokya::errors::{EngineError, EngineResult};
use kapadokya::store::{self, RouteFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rebuild or create route / POI associations")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Recompute auto associations for one route, or all active routes
    Rebuild {
        /// Route id; omit to rebuild every active route
        #[arg(long)]
        route: Option<i64>,

        /// Association radius override, metres
        #[arg(long)]
        radius: Option<f64>,
    },
    /// Pin a POI to a route; auto rebuilds will not remove it
    Manual {
        #[arg(long)]
        route: i64,

        #[arg(long)]
        poi: i64,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long, default_value = "operator")]
        created_by: String,
    },
}

async fn run(args: Args) -> EngineResult<()> {
    let config = Config::from_env()?;
    let pool = kapadokya::postgres_tools::make_async_pool(&config.database_url)
        .await
        .map_err(|e| EngineError::Database(format!("pool init: {}", e)))?;
    let mut conn = pool.get().await?;

    match args.cmd {
        Command::Rebuild { route, radius } => {
            let params = AssociationParams {
                radius_m: radius.unwrap_or(config.association_radius_m),
                ..Default::default()
            };

            let targets = match route {
                Some(id) => vec![id],
                None => {
                    let filter = RouteFilter {
                        active: Some(true),
                        ..Default::default()
                    };
                    store::list_routes(&mut conn, &filter)
                        .await?
                        .into_iter()
                        .filter(|r| {
                            if r.route_geometry.is_none() {
                                log::warn!("route {} has no geometry, skipping", r.id);
                                return false;
                            }
                            true
                        })
                        .map(|r| r.id)
                        .collect()
                }
            };

            for route_id in targets {
                let report =
                    associations::rebuild_associations(&mut conn, route_id, params).await?;
                println!(
                    "route {}: {} candidates, {} upserted, {} pruned",
                    report.route_id, report.candidates, report.upserted, report.pruned
                );
            }
        }
        Command::Manual {
            route,
            poi,
            notes,
            created_by,
        } => {
            associations::create_manual_association(
                &mut conn,
                route,
                poi,
                notes.as_deref(),
                &created_by,
            )
            .await?;
            println!("pinned poi {} to route {}", poi, route);
        }
    }

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
