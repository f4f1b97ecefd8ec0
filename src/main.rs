use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use escrow_engine::{
    config::Config,
    crypto::{PiiCipher, PlainTextCipher},
    database::Database,
    funding::FundingService,
    handlers::{self, AppState},
    ledger::LedgerEngine,
    metrics,
    payments::PaymentService,
    rails,
    webhooks::{RedisDedupStore, WebhookProcessor},
    workers::{
        escrow_activation::EscrowActivationWorker,
        expiry::ExpirySweeper,
        payment_confirmation::PaymentConfirmationWorker,
        refund::RefundWorker,
        retry::{RetryConfig, RetryStrategy},
        JobQueues,
    },
};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    if let Err(e) = metrics::register_metrics(prometheus::default_registry()) {
        tracing::warn!("Failed to register metrics: {}", e);
    }

    info!("Starting Escrow Engine on port {}", config.server.port);

    let db = Arc::new(
        Database::new(&config.database.url, config.database.max_connections)
            .await
            .expect("Failed to connect to database"),
    );
    db.migrate().await.expect("Failed to run migrations");

    let redis_client =
        redis::Client::open(config.redis.url.clone()).expect("Failed to create Redis client");
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .expect("Failed to connect to Redis");

    let (mobile_money, chain) = rails::build_rails(&config.rails);
    let cipher: Arc<dyn PiiCipher> = Arc::new(PlainTextCipher);

    let queues = Arc::new(JobQueues::new(redis_conn.clone()));
    let ledger = Arc::new(LedgerEngine::new(db.clone(), config.ledger.clone()));
    let funding = Arc::new(FundingService::new(
        db.clone(),
        mobile_money.clone(),
        chain.clone(),
        cipher.clone(),
        config.funding.clone(),
        config.ledger.clone(),
    ));
    let payments = Arc::new(PaymentService::new(
        db.clone(),
        ledger.clone(),
        cipher.clone(),
        queues.clone(),
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        Arc::new(RedisDedupStore::new(redis_conn.clone())),
        db.clone(),
        funding.clone(),
        payments.clone(),
        queues.clone(),
        config.webhook.dedup_ttl_secs,
    ));

    let retry_config = RetryConfig {
        max_retries: 3,
        initial_delay_ms: config.workers.initial_backoff_ms,
        max_delay_ms: config.workers.max_backoff_ms,
        ..RetryConfig::default()
    };
    let poll_interval = Duration::from_millis(config.workers.poll_interval_ms);

    let activation_worker = Arc::new(EscrowActivationWorker::new(
        db.clone(),
        chain.clone(),
        queues.clone(),
        RetryStrategy::new(retry_config.clone()),
        config.workers.max_attempts,
    ));
    tokio::spawn(activation_worker.run_forever(
        config.workers.activation_concurrency,
        poll_interval,
    ));

    let confirmation_worker = Arc::new(PaymentConfirmationWorker::new(
        db.clone(),
        chain.clone(),
        mobile_money.clone(),
        cipher.clone(),
        queues.clone(),
        RetryStrategy::new(retry_config.clone()),
        config.workers.max_attempts,
        config.rails.treasury_address.clone(),
    ));
    tokio::spawn(confirmation_worker.run_forever(
        config.workers.confirmation_concurrency,
        poll_interval,
    ));

    let refund_worker = Arc::new(RefundWorker::new(
        db.clone(),
        chain.clone(),
        queues.clone(),
        RetryStrategy::new(retry_config),
        config.workers.max_attempts,
    ));
    tokio::spawn(refund_worker.run_forever(config.workers.refund_concurrency, poll_interval));

    let expiry_sweeper = Arc::new(ExpirySweeper::new(
        db.clone(),
        ledger.clone(),
        queues.clone(),
        Duration::from_secs(config.workers.expiry_sweep_interval_secs),
    ));
    tokio::spawn(expiry_sweeper.run_forever());

    let state = web::Data::new(AppState {
        funding,
        payments,
        ledger,
        webhooks,
        queues,
        db,
        config: config.clone(),
    });

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(state.clone())
            .configure(handlers::configure_routes)
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .workers(config.server.workers)
    .run()
    .await
}
