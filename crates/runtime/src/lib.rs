//! Runtime for the agent marketplace: provider adapters, the quota and
//! entitlement gate, the rate-limit breaker, and the dispatch engine
//! that ties them together.

pub mod adapter;
pub mod adapters;
pub mod breaker;
pub mod engine;
pub mod gate;

pub use adapter::{AdapterRegistry, AdapterReply, ModelAdapter, ReplyCategory};
pub use adapters::{AnthropicAdapter, OllamaAdapter, OpenAiAdapter};
pub use breaker::RateLimitBreaker;
pub use engine::{ChatReply, ChatRequest, DispatchEngine};
pub use gate::{CallerDirectory, GateTicket, QuotaGate, StaticCallerDirectory};
