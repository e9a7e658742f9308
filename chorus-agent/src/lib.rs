// ABOUTME: Remote-agent boundary for chorus: wire protocol, worker harness, mock agent.
// ABOUTME: Provides the contract any per-provider chat-surface adapter must honor.

pub mod handle;
pub mod mock;
pub mod protocol;
pub mod traits;

pub use handle::{AgentChannel, AgentHost, Command};
pub use mock::MockAgent;
pub use protocol::{Ack, Envelope, Message, StatusSnapshot};
pub use traits::RemoteAgent;
