//! Repository layer for data access

pub mod campaigns;
pub mod delivery_records;
pub mod queue_jobs;

// Re-export concrete repository implementations with simple names
pub use campaigns::DbCampaignRepository;
pub use delivery_records::DbDeliveryRecordRepository;
pub use queue_jobs::DbQueueJobRepository;

// Re-export repository traits
pub use campaigns::CampaignRepository;
pub use delivery_records::DeliveryRecordRepository;
pub use queue_jobs::QueueJobRepository;

use std::sync::Arc;

use crate::db::DatabasePool;
use crate::memory::MemoryStore;

/// The three stores the engine works against, behind trait objects
#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub records: Arc<dyn DeliveryRecordRepository>,
    pub jobs: Arc<dyn QueueJobRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            records: Arc::new(DbDeliveryRecordRepository::new(pool.clone())),
            jobs: Arc::new(DbQueueJobRepository::new(pool)),
        }
    }

    /// Repositories over a single in-memory store
    pub fn memory(store: MemoryStore) -> Self {
        Self {
            campaigns: Arc::new(store.clone()),
            records: Arc::new(store.clone()),
            jobs: Arc::new(store),
        }
    }
}
