//! Application use cases. The streaming core and its shared state.

pub mod block_cache;
pub mod connection_tracker;
pub mod metadata;
pub mod player_registry;
pub mod session_coordinator;
pub mod stream_reader;

pub use block_cache::BlockCache;
pub use connection_tracker::ConnectionTracker;
pub use metadata::MetadataCache;
pub use player_registry::PlayerRegistry;
pub use session_coordinator::SessionCoordinator;
pub use stream_reader::TelegramReader;
