pub mod config;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

use lokcet_feed::FeedService;
use lokcet_messaging::{MessagingService, SeenRetry};
use lokcet_shared::clients::blob::{BlobStore, MemoryBlobStore, MinioClient};
use lokcet_shared::clients::db::create_pool;
use lokcet_shared::clients::kv::{KeyValueStore, MemoryKeyValueStore, RedisClient};
use lokcet_shared::clients::push::{Notifier, PushClient};
use lokcet_shared::middleware::TokenSecret;
use lokcet_shared::store::{DocumentStore, MemoryStore, PgDocumentStore};
use lokcet_social::{AccountService, FeedbackService, JwtSettings, RelationshipService};

use crate::config::{AppConfig, Backend};

/// External systems the services are built on.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl Backends {
    pub fn in_memory(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            kv: Arc::new(MemoryKeyValueStore::new()),
            notifier,
        }
    }

    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let notifier: Arc<dyn Notifier> = Arc::new(PushClient::new(&config.push_url, &config.push_api_key));
        match config.backend {
            Backend::Memory => {
                tracing::warn!("running on in-memory backends, data is lost on restart");
                Ok(Self::in_memory(notifier))
            }
            Backend::Postgres => {
                let pool = create_pool(&config.database_url, config.db_pool_size)?;
                let store = PgDocumentStore::connect(pool).await?;
                let kv = RedisClient::connect(&config.redis_url).await?;
                let blobs = MinioClient::new(
                    &config.minio_endpoint,
                    &config.minio_access_key,
                    &config.minio_secret_key,
                    &config.minio_bucket,
                    &config.minio_public_url,
                )
                .await;
                Ok(Self {
                    store: Arc::new(store),
                    blobs: Arc::new(blobs),
                    kv: Arc::new(kv),
                    notifier,
                })
            }
        }
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub notifier: Arc<dyn Notifier>,
    pub accounts: AccountService,
    pub relationships: RelationshipService,
    pub messaging: MessagingService,
    pub feed: FeedService,
    pub feedback: FeedbackService,
    pub metrics_handle: PrometheusHandle,
    /// Fired on shutdown so open event streams end.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, backends: Backends, metrics_handle: PrometheusHandle) -> Self {
        let Backends {
            store,
            blobs,
            kv,
            notifier,
        } = backends;

        let messaging = MessagingService::new(store.clone(), notifier.clone()).with_seen_retry(SeenRetry {
            attempts: config.seen_retry_attempts,
            delay: Duration::from_millis(config.seen_retry_delay_ms),
        });
        let jwt = JwtSettings {
            secret: config.jwt_secret.clone(),
            access_ttl_secs: config.access_token_ttl_secs,
        };
        let accounts = AccountService::new(
            store.clone(),
            blobs.clone(),
            messaging.clone(),
            jwt,
            config.invite_base_url.clone(),
        );
        let relationships = RelationshipService::new(store.clone(), notifier.clone(), messaging.clone())
            .with_max_distance_km(config.max_distance_km);
        let feed = FeedService::new(store.clone(), blobs.clone(), kv.clone(), notifier.clone(), messaging.clone());
        let feedback = FeedbackService::new(store.clone(), blobs);

        Self {
            config,
            store,
            kv,
            notifier,
            accounts,
            relationships,
            messaging,
            feed,
            feedback,
            metrics_handle,
            shutdown: CancellationToken::new(),
        }
    }
}

impl TokenSecret for AppState {
    fn jwt_secret(&self) -> &str {
        &self.config.jwt_secret
    }
}
