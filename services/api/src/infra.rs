use metrics_exporter_prometheus::PrometheusHandle;
use repquest::adapters::{InMemoryStore, LoggingSender, PostgrestStore, ResendSender};
use repquest::config::{AppConfig, StoreConfig};
use repquest::error::AppError;
use repquest::fundraising::notify::{self, NotificationQueue};
use repquest::fundraising::{
    FundraiserService, FundraiserStore, NotificationDispatcher, NotificationSender, PointsLedger,
    SystemClock,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Service wiring shared by the HTTP server and the one-shot CLI jobs.
pub(crate) struct Runtime {
    pub(crate) service: Arc<FundraiserService>,
    pub(crate) dispatcher: NotificationDispatcher,
    pub(crate) queue: NotificationQueue,
}

pub(crate) fn build_runtime(config: &AppConfig) -> Result<Runtime, AppError> {
    let (store, ledger): (Arc<dyn FundraiserStore>, Arc<dyn PointsLedger>) = match &config.store
    {
        StoreConfig::InMemory => {
            warn!("using the in-memory store; data is lost on exit");
            let store = Arc::new(InMemoryStore::new());
            (store.clone(), store)
        }
        StoreConfig::Postgrest(postgrest) => {
            info!(base_url = %postgrest.base_url, "using the PostgREST store");
            let store = Arc::new(PostgrestStore::new(postgrest)?);
            (store.clone(), store)
        }
    };

    let notifier = &config.notifier;
    let sender: Arc<dyn NotificationSender> = match &notifier.resend_api_key {
        Some(api_key) => Arc::new(ResendSender::new(api_key.clone(), notifier.from.clone())?),
        None => {
            warn!("RESEND_API_KEY not set; notifications are logged instead of sent");
            Arc::new(LoggingSender)
        }
    };

    let (outbox, queue) = notify::channel();
    let service = Arc::new(FundraiserService::new(
        store,
        ledger,
        Arc::new(SystemClock),
        outbox,
        config.settlement.missing_progress,
    ));
    let dispatcher =
        NotificationDispatcher::new(sender, notifier.max_attempts, notifier.retry_backoff);

    Ok(Runtime {
        service,
        dispatcher,
        queue,
    })
}
