// ABOUTME: Core dispatch engine: endpoint registry, session fan-out, protocol routing.
// ABOUTME: Environment-agnostic; the host execution environment is injected via a trait.

pub mod config;
pub mod error;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod query;
pub mod registry;
pub mod router;
pub mod testing;
pub mod traits;

pub use config::Config;
pub use error::{error_message, DispatchError, FailureKind};
pub use history::{HistoryStore, KvStore, MemoryStore, Rating, RatingStats, RatingVerdict, SqliteStore};
pub use orchestrator::{DispatchConfig, DispatchOrchestrator};
pub use providers::{url_matches, ProviderDirectory, ProviderInfo};
pub use query::{Query, QueryResponse, QuerySession, SessionStatus};
pub use registry::{EndpointRegistry, ManagedEndpoint, ProviderStatus};
pub use router::{ProtocolRouter, RouteOutcome, SenderIdentity};
pub use traits::{ContextId, Environment};

// Re-export remote-agent boundary types
pub use chorus_agent::{Ack, Envelope, Message, StatusSnapshot};
