//! The hook system of the transport: plugins register delivery hooks, the
//! dispatch [`Chain`] runs a message through them, and the
//! [`PluginManager`] loads plugins and only reclaims one once nothing is
//! executing its code.
//!
//! Native plugins export `HOOK_LibMain` and reach the host through the
//! `hermod_*` C functions resolved via `query_service`.

pub mod chain;
pub mod context;
pub mod error;
pub mod hook;
pub mod manager;
pub mod native;
pub mod plugin;
pub mod registry;
pub mod services;
pub mod string;

pub use chain::{CallStack, Chain, ContextHost, MAX_THROWING_NUM, Throwable};
pub use error::{PluginError, RegisterError, ThrowError};
pub use hook::{Hook, HookId};
pub use manager::PluginManager;
pub use plugin::{Plugin, PluginHost, PluginSignal, Talk, TalkOutcome};
pub use registry::{HookEntry, HookRegistry, Snapshot, Terminal, Terminals};
pub use services::{Capacity, Identity, NoServices, ServiceAddr, ServiceDirectory, Services};
