//! # planrun-core
//!
//! Foundation types shared by every planrun crate.
//!
//! - **Keys and IDs**: [`ids::PlanKey`], [`ids::SubscriptionId`], [`ids::ReplyId`]
//! - **Errors**: [`errors::ApiError`], the client-visible terminal payload of a plan run
//! - **Status**: [`status::PlanStatus`] values written to the status store
//! - **Stream messages**: [`stream::StreamMessage`] fanned out to subscribers
//! - **Conversation**: [`messages::ConvoMessage`] and [`messages::Subtask`] snapshots
//! - **Logging**: [`logging::init_logging`] tracing subscriber setup
//! - **Metrics**: metric name constants in [`metrics`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other planrun crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod metrics;
pub mod status;
pub mod stream;

pub use errors::{ApiError, ApiErrorKind};
pub use ids::{PlanKey, ReplyId, SubscriptionId};
pub use status::PlanStatus;
pub use stream::StreamMessage;
