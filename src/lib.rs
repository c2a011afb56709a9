//! ADAM - Alarm Dispatch and Management
//!
//! Decides which single open alarm each shared annunciator shows, and tracks
//! every alarm through acknowledge, complete, dismiss and shelve.
//!
//! The engine is transport-agnostic: feed it raw payloads through
//! [`Engine::on_inbound_alarm`], [`Engine::on_operator_message`] and
//! [`Engine::on_tick`], and it pushes display updates through the
//! [`Publisher`] it was built with.
//!
//! # Examples
//!
//! ```rust
//! use adam::{Engine, EngineConfig, PolicyKind, Result};
//! use std::sync::Arc;
//!
//! let config = EngineConfig {
//!     annunciators: vec!["KRAKE_LB0001".into()],
//!     policy: PolicyKind::Severity,
//!     ..EngineConfig::default()
//! };
//! let publisher = |ann: &str, payload: &str| -> Result<()> {
//!     println!("{} <- {}", ann, payload);
//!     Ok(())
//! };
//! let engine = Engine::with_system_clock(&config, Arc::new(publisher))?;
//! engine.on_inbound_alarm(b"a4{BEEF}boiler trip")?;
//! assert_eq!(engine.open_view().len(), 1);
//! # Ok::<(), adam::AdamError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error taxonomy shared by every module
pub mod error;

/// Compact wire format for alarms and operator responses
pub mod codec;

/// Alarm record and lifecycle state machine
pub mod alarm;

/// Authoritative alarm table
pub mod store;

/// Per-annunciator display state
pub mod annunciator;

/// Selection policies
pub mod policy;

/// Shelve expiry
pub mod shelve;

/// Injectable time source
pub mod clock;

/// YAML configuration
pub mod config;

/// Arbitration loop
pub mod engine;

// ============================================================================
// TRANSPORT (feature-gated)
// ============================================================================

#[cfg(feature = "mqtt")]
#[cfg_attr(docsrs, doc(cfg(feature = "mqtt")))]
pub mod mqtt;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use alarm::{AlarmRecord, AlarmStatus, HistoryAction, HistoryEntry, OperatorAction, Transition};
pub use annunciator::{AnnunciatorState, AnnunciatorTable};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{AlarmMessage, AnnunciatorCommand, OperatorMessage, WireCodec};
pub use config::{Config, EngineConfig, MqttConfig};
pub use engine::{
    AnnunciatorView, DisplayEvent, DisplayEventKind, DisplayUpdate, Engine, EngineStats,
    PassReport, Publisher, ReleaseReason,
};
pub use error::{AdamError, Result};
pub use policy::{Policy, PolicyKind};
pub use shelve::{ShelveTimer, Unshelved};
pub use store::AlarmStore;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttPublisher, MqttTransport};

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// ADAM version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information stamped by build.rs
pub mod build_info {
    /// Git commit hash (if built from a checkout)
    pub const GIT_HASH: Option<&str> = option_env!("ADAM_GIT_HASH");

    /// Build timestamp
    pub const BUILD_TIMESTAMP: Option<&str> = option_env!("ADAM_BUILD_TIMESTAMP");

    /// Rust version used for compilation
    pub const RUSTC_VERSION: Option<&str> = option_env!("ADAM_RUST_VERSION");

    /// Build profile (debug/release)
    pub const PROFILE: Option<&str> = option_env!("ADAM_PROFILE");
}
