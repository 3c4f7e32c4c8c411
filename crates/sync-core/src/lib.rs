//! Domain model, cryptography, local persistence, and the sync queue for
//! the end-to-end-encrypted data synchronization engine. Anything that
//! needs to speak HTTP lives in `sync-protocol`, which depends on this
//! crate for its error taxonomy and domain types.

pub mod account;
pub mod config;
pub mod crypter;
pub mod daily_stats;
pub mod data_provider;
pub mod error;
pub mod feature_flags;
pub mod metadata_store;
pub mod scheduler;
pub mod secure_store;
pub mod sync_queue;
pub mod transport;

pub use account::{Account, AuthState, ConnectCode, DeviceType, RecoveryKey};
pub use config::SyncConfig;
pub use daily_stats::DailyStats;
pub use data_provider::{DataProvider, Feature, Syncable, SyncOperationError, SyncResult};
pub use error::{Result, RetryClass, SyncError};
pub use metadata_store::{FeatureMetadata, MetadataStore, SetupState};
pub use scheduler::{Scheduler, SyncCycleTrigger};
pub use secure_store::{FileSecureStore, InMemorySecureStore, SecureStore};
pub use sync_queue::{CycleOutcome, SyncQueue};
pub use transport::{FeatureResponseEnvelope, FeatureUpdatePayload, SyncTransport};
