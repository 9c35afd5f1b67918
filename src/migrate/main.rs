use clap::Parser;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use kapadokya::config::Config;
use kapadokya::errors::{EngineError, EngineResult};
use kapadokya::models::SchemaMigrationRow;

#[derive(Parser, Debug)]
#[command(author, version, about = "Apply schema migrations for the route engine")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Apply every pending migration
    Run,
    /// Apply pending migrations, then insert sample Ürgüp data
    Seed,
    /// Print migration history
    Status,
}

async fn run(args: Args) -> EngineResult<()> {
    let config = Config::from_env()?;
    let pool = kapadokya::postgres_tools::make_async_pool(&config.database_url)
        .await
        .map_err(|e| EngineError::Database(format!("pool init: {}", e)))?;
    let mut conn = pool.get().await?;

    match args.cmd {
        Command::Run => {
            let summary = kapadokya::migrations::run_pending(&mut conn).await?;
            println!(
                "applied {}, skipped {}",
                summary.applied.len(),
                summary.skipped.len()
            );
            if let Some((migration_name, detail)) = summary.failed {
                return Err(EngineError::Database(format!(
                    "migration {} failed: {}",
                    migration_name, detail
                )));
            }
        }
        Command::Seed => {
            let summary = kapadokya::migrations::run_pending(&mut conn).await?;
            if let Some((migration_name, detail)) = summary.failed {
                return Err(EngineError::Database(format!(
                    "migration {} failed: {}",
                    migration_name, detail
                )));
            }
            let inserted = kapadokya::migrations::seed_sample_data(&mut conn).await?;
            println!("seeded {} POIs", inserted);
        }
        Command::Status => {
            use kapadokya::schema::schema_migrations::dsl::*;

            let rows = schema_migrations
                .order(id.asc())
                .select(SchemaMigrationRow::as_select())
                .load::<SchemaMigrationRow>(&mut conn)
                .await?;
            if rows.is_empty() {
                println!("no migrations recorded");
            }
            for row in rows {
                println!(
                    "{} {} {} {}ms{}",
                    if row.success { "ok " } else { "FAIL" },
                    row.migration_name,
                    row.migration_version,
                    row.execution_time_ms,
                    row.error_detail
                        .map(|d| format!(" ({})", d))
                        .unwrap_or_default()
                );
            }
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
