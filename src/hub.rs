//! Wiring for one deployment's aggregation hub.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::aggregate::AggregateStore;
use crate::bus::{FanoutPublisher, UpdateBus};
use crate::connection::ClientConnection;
use crate::db::{Database, DbError};
use crate::registry::ConnectionRegistry;
use crate::router::IngestRouter;
use crate::transport::ClientChannel;

/// Owns the shared pieces (database, bus, registry, aggregate store,
/// publisher) and hands out routers and connection handles wired to them.
///
/// One hub per deployment. Constructed once at startup and shared via `Arc`.
pub struct PulseHub {
    db: Arc<Database>,
    bus: Arc<UpdateBus>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<AggregateStore>,
    publisher: Arc<FanoutPublisher>,
}

impl PulseHub {
    /// Build the hub for `deployment_id`, restoring persisted aggregate
    /// state and any connections that survived a previous process.
    pub fn new(
        db: Arc<Database>,
        deployment_id: impl Into<String>,
        transport: Arc<dyn ClientChannel>,
    ) -> Result<Self, DbError> {
        let registry = Arc::new(ConnectionRegistry::new(db.clone()));
        let restored = registry.restore_persisted()?;
        if restored > 0 {
            tracing::info!(restored, "restored persisted connections");
        }

        let store = Arc::new(AggregateStore::open(db.clone(), deployment_id)?);
        let bus = Arc::new(UpdateBus::new());
        let publisher = Arc::new(FanoutPublisher::new(registry.clone(), transport));

        Ok(Self {
            db,
            bus,
            registry,
            store,
            publisher,
        })
    }

    /// Spawn the fan-out loop. Call once after construction.
    pub fn start_fanout(&self) -> JoinHandle<()> {
        self.publisher.clone().start(self.bus.subscribe())
    }

    /// A router for the producer feeds. Cheap to create; feeds may hold
    /// their own.
    pub fn router(&self) -> IngestRouter {
        IngestRouter::new(self.db.clone(), self.store.clone(), self.bus.clone())
    }

    /// Handle for a newly accepted duplex connection, in `Connecting` phase.
    pub fn connect(&self, connection_id: impl Into<String>) -> ClientConnection {
        ClientConnection::new(
            connection_id.into(),
            self.registry.clone(),
            self.store.clone(),
            self.publisher.clone(),
        )
    }

    pub fn store(&self) -> &Arc<AggregateStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<UpdateBus> {
        &self.bus
    }

    pub fn publisher(&self) -> &Arc<FanoutPublisher> {
        &self.publisher
    }
}
