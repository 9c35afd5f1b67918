use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::ManagerConfig;
use diesel_async::pooled_connection::RecyclingMethod;
use diesel_async::pooled_connection::bb8::Pool;

/// This type alias is the pool, which can be queried for connections.
/// It is typically wrapped in Arc to allow thread safe cloning to the same pool
pub type KapadokyaPostgresPool =
    bb8::Pool<AsyncDieselConnectionManager<diesel_async::AsyncPgConnection>>;

pub async fn make_async_pool(
    database_url: &str,
) -> Result<KapadokyaPostgresPool, Box<dyn std::error::Error + Sync + Send>> {
    let mut custom_conf = ManagerConfig::default();

    custom_conf.recycling_method = RecyclingMethod::Fast;

    let config: AsyncDieselConnectionManager<diesel_async::AsyncPgConnection> =
        AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new_with_config(
            database_url,
            custom_conf,
        );
    let pool = Pool::builder()
        .max_size(16)
        .min_idle(Some(2))
        .build(config)
        .await?;

    Ok(pool)
}
