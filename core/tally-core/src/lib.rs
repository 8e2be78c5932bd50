//! # tally-core
//!
//! Sync and reconciliation core shared by the watch and phone apps.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Platform callbacks go through a
//!   bounded channel into one event-loop thread.
//! - **Best-effort delivery**: Sends are fire-and-forget. A refused send is
//!   reported and dropped, never queued or retried.
//! - **Idempotent persistence**: Redelivered sessions are absorbed by a
//!   content-derived dedup key.
//! - **Graceful degradation**: An unusable shared container falls back to a
//!   process-local region; malformed inbound data is logged and skipped.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_core::{EngineOptions, LoopbackTransport, StorageConfig, TallyEngine};
//!
//! let (watch_side, _phone_side) = LoopbackTransport::pair();
//! let engine = TallyEngine::start(EngineOptions::new(
//!     StorageConfig::from_home()?,
//!     Arc::new(watch_side),
//! ))?;
//! engine.increment()?;
//! let receipt = engine.submit_session(None, None, None)?;
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod logging;
pub mod mirror;
pub mod notify;
pub mod reconciler;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod store;
pub mod widgets;

pub use clock::{Clock, SystemClock};
pub use config::TallyConfig;
pub use engine::{EngineOptions, SubmitReceipt, TallyEngine};
pub use error::{LinkError, ReconcileError, RegionError, Result, StoreError, TallyError};
pub use link::{InboundChannel, Link, LinkEvent, LoopbackTransport, Role, Transport};
pub use mirror::{CounterState, CounterStore, MessageItem, MessageLog};
pub use notify::{EventName, Notification, NotificationHub, Subscription};
pub use reconciler::{Reconciliation, SessionReconciler};
pub use session::{ErrorCategory, SessionRecord};
pub use storage::StorageConfig;
pub use store::{InsertOutcome, SessionStore, SqliteSessionStore};
pub use widgets::{NoopScheduler, TimelineScheduler, WidgetRefreshTrigger};
