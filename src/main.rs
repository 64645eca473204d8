use std::{process, sync::Arc};

use snapcache::{
    application::{
        data_source::DataSource, error::AppError, kits::KitBuilder,
        snapshot_service::PublishedSnapshotService,
    },
    cache::{CacheConfig, LoadReport},
    config,
    domain::ContentKind,
    infra::{db::PostgresRepositories, error::InfraError, telemetry},
    serialization::{ConfiguredCompressionOptions, PropertyCacheCompression, create_serializer},
};
use sqlx::postgres::PgPool;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Load(config::LoadArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Load(_) => run_load(settings).await,
        config::Command::Verify => run_verify(settings).await,
        config::Command::Migrate => run_migrate(settings).await,
    }
}

async fn run_load(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let service = build_snapshot_service(repositories, &settings.cache, false);

    let (content, media) = service.load_all().await?;
    report_load(ContentKind::Content, &content);
    report_load(ContentKind::Media, &media);

    let snapshot = service.create_snapshot();
    info!(
        content_roots = snapshot.content.get_at_root().len(),
        media_roots = snapshot.media.get_at_root().len(),
        generation = snapshot.content.generation(),
        "Published snapshot ready"
    );
    Ok(())
}

async fn run_verify(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    repositories
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    let service = build_snapshot_service(repositories, &settings.cache, true);

    let (content, media) = service.load_all().await?;
    report_load(ContentKind::Content, &content);
    report_load(ContentKind::Media, &media);

    let skipped = content.skipped.len() + media.skipped.len();
    if skipped > 0 {
        return Err(AppError::validation(format!(
            "{skipped} node(s) could not be placed in the published trees"
        )));
    }
    info!("Persisted cache rows verified");
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect(&settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!("Database migrations applied");
    Ok(())
}

async fn connect(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let pool = connect(settings).await?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(
        PostgresRepositories::new(pool).with_page_size(settings.cache.sql_page_size),
    ))
}

fn build_snapshot_service(
    repositories: Arc<PostgresRepositories>,
    settings: &config::CacheSettings,
    strict: bool,
) -> PublishedSnapshotService {
    let options = ConfiguredCompressionOptions::new(settings.compressed_properties.clone());
    let compression = Arc::new(PropertyCacheCompression::new(Arc::new(options)));
    let serializer = create_serializer(settings.serializer, compression, settings.decompression);
    let kits = KitBuilder::new(serializer, strict || settings.fail_on_missing_payload);

    let data_source = Arc::new(DataSource::new(
        repositories.clone(),
        repositories,
        kits,
        settings.sql_page_size,
    ));
    PublishedSnapshotService::new(CacheConfig::from(settings), data_source)
}

fn report_load(kind: ContentKind, report: &LoadReport) {
    for skipped in &report.skipped {
        warn!(
            kind = kind.as_str(),
            node_id = skipped.id,
            reason = %skipped.reason,
            "Node left out of the published tree"
        );
    }
    info!(
        kind = kind.as_str(),
        loaded = report.loaded,
        skipped = report.skipped.len(),
        "Tree loaded"
    );
}
