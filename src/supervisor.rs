//! Process Supervisor — dependency-ordered startup and broadcast-based
//! graceful shutdown for the whole router process.
//!
//! Builds components in dependency order: Registry, then Stats Collector (both
//! depend on nothing but config), then the Message Bus, then the Workflow
//! Manager (depends on the Registry and the Message Bus, so expired
//! workflows can clear their own mailboxes), then the Routing Policy
//! (depends on Registry + Workflow Manager), then the Request Proxy, and
//! finally the HTTP server.

use crate::api::{build_router, handlers::ApiState};
use crate::config::{RouterConfig, ServiceDiscoveryMode};
use crate::error::{Result, RouterError};
use crate::messages::MessageBus;
use crate::models::Endpoint;
use crate::policies::build_policy;
use crate::proxy::RequestProxy;
use crate::registry::{EndpointRegistry, HttpControllerClient, StaticControllerClient};
use crate::stats_collector::StatsCollector;
use crate::workflow_manager::WorkflowManager;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// A fully wired, running router instance.
pub struct RouterProcess {
    pub config: RouterConfig,
    pub registry: Arc<EndpointRegistry>,
    pub stats: Arc<StatsCollector>,
    pub workflow_manager: Arc<WorkflowManager>,
    pub message_bus: Arc<MessageBus>,
    pub proxy: Arc<RequestProxy>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RouterProcess {
    /// Builds every component in dependency order. Does not bind the HTTP
    /// listener — call `serve` for that, so tests can construct a process
    /// and drive its components directly without opening a socket.
    pub async fn start(config: RouterConfig) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(16);

        info!("starting endpoint registry");
        let registry = match config.service_discovery {
            ServiceDiscoveryMode::Static => {
                if config.static_backends.is_empty() {
                    return Err(RouterError::Configuration(
                        "static discovery requires at least one STATIC_BACKENDS entry".to_string(),
                    ));
                }
                let endpoints: Vec<Endpoint> = config
                    .static_backends
                    .iter()
                    .map(|url| Endpoint::new(url.clone(), config.static_models.clone()))
                    .collect();
                EndpointRegistry::static_registry(endpoints, config.staleness_bound())
            }
            ServiceDiscoveryMode::K8s => {
                let controller_url = config.controller_url.clone().ok_or_else(|| {
                    RouterError::Configuration("k8s discovery requires CONTROLLER_URL".to_string())
                })?;
                let client: Arc<dyn crate::registry::ClusterControllerClient> =
                    Arc::new(HttpControllerClient::new(controller_url));
                EndpointRegistry::spawn_polled(
                    client,
                    config.engine_scrape_interval(),
                    config.staleness_bound(),
                    config.engine_scrape_interval() * 3,
                    shutdown_tx.subscribe(),
                )
            }
        };

        info!("starting stats collector");
        let stats = StatsCollector::new(config.engine_scrape_interval(), config.request_stats_window());
        {
            let registry_for_scrape = registry.clone();
            stats.spawn_scrape_loop(move || registry_for_scrape.list().into_iter().map(|e| e.url).collect(), shutdown_tx.subscribe());
        }

        info!("starting message bus");
        let message_bus = MessageBus::new(config.max_message_queue_size);

        info!("starting workflow manager");
        let workflow_manager = WorkflowManager::new(config.clone(), registry.clone(), stats.clone(), message_bus.clone());
        workflow_manager.spawn_cleanup_task(
            config.cleanup_interval(),
            registry.subscribe_removals(),
            shutdown_tx.subscribe(),
        );

        info!(policy = ?config.routing_logic, "building routing policy");
        let policy = build_policy(&config, registry.clone(), stats.clone(), workflow_manager.clone());

        info!("starting request proxy");
        let proxy = RequestProxy::new(config.clone(), policy, registry.clone(), stats.clone(), workflow_manager.clone());

        Ok(Self {
            config,
            registry,
            stats,
            workflow_manager,
            message_bus,
            proxy,
            shutdown_tx,
        })
    }

    /// Binds and serves the HTTP surface until a shutdown signal (ctrl-c or
    /// an explicit `trigger_shutdown`) is received.
    pub async fn serve(&self) -> Result<()> {
        self.registry.wait_ready().await;

        let state = ApiState {
            config: self.config.clone(),
            proxy: self.proxy.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            workflow_manager: self.workflow_manager.clone(),
            message_bus: self.message_bus.clone(),
        };
        let app = build_router(state);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!(%addr, "fleet router listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::Server::bind(&addr.parse().map_err(|e| RouterError::Configuration(format!("invalid bind address: {e}")))?)
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("shutdown signal received, draining connections");
            })
            .await
            .map_err(|e| RouterError::Internal(e.to_string()))
    }

    /// Broadcasts shutdown to every background task (discovery polling,
    /// stats scraping, workflow cleanup) and the HTTP listener.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
