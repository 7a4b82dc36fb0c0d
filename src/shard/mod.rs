pub mod client;
pub mod commit;
pub mod coordinator;
pub mod directory;
pub mod federator;
pub mod http;
pub mod memory;
pub mod merge;
pub mod ring;
pub mod router;

// Re-exports
pub use client::{ShardAck, ShardClient, ShardQuery, ShardResponse};
pub use commit::{CommitCoordinator, CommitOutcome, CommitReport};
pub use coordinator::FederatedIndex;
pub use directory::{Partition, PartitionDirectory};
pub use federator::{FederatorSettings, QueryFederator};
pub use http::HttpShardClient;
pub use memory::MemoryShard;
pub use merge::{merge_responses, MergedPage, PageWindow};
pub use ring::{key_hash, HashRing};
pub use router::{WriteAck, WriteRouter};
