//! # rjunos - Transactional Configuration for Junos Devices
//!
//! `rjunos` drives Juniper Junos devices over NETCONF/SSH the way an
//! infrastructure-as-code provider needs: every write is wrapped in a locked
//! candidate transaction that is committed or discarded as a unit, and all
//! writers in the process are serialized so one commit never picks up another
//! writer's half-applied lines.
//!
//! ## Features
//!
//! - **Transaction Envelope**: lock, set, commit and clear on every write,
//!   with the clear running exactly once whatever failed
//! - **Global Writer Lock**: a process-wide FIFO mutex around the envelope
//! - **Resource Lifecycle**: create, read, update, delete and import of any
//!   type implementing [`lifecycle::ResourceOperations`]
//! - **Line Codec**: `display set relative` parsing and `set` line building
//! - **Offline Mode**: writes appended to a set file instead of a device
//! - **Session Recording**: JSONL capture and replay of device sessions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rjunos::config::ProviderConfig;
//! use rjunos::lifecycle::LifecycleDriver;
//! use rjunos::resources::Vlan;
//! use rjunos::session::SessionManager;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProviderConfig {
//!         ip: "192.168.1.1".to_string(),
//!         username: "netconf".to_string(),
//!         password: Some("password".to_string()),
//!         ..Default::default()
//!     };
//!     let driver = LifecycleDriver::new(SessionManager::new(config)?);
//!
//!     let mut vlan = Vlan {
//!         vlan_id: Some("100".to_string()),
//!         ..Vlan::new("v100")
//!     };
//!     let diags = driver.create(&mut vlan, &CancellationToken::new()).await;
//!     for diag in diags.iter() {
//!         println!("{:?}: {} ({})", diag.severity, diag.summary, diag.detail);
//!     }
//!     println!("id: {:?}", vlan.id);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::SessionManager`] - Opens device sessions and hands out the writer lock
//! - [`session::ConfigTransaction`] - Lock/set/commit/clear on one session
//! - [`lifecycle::LifecycleDriver`] - Resource operations inside the transaction envelope
//! - [`codec`] - Configuration line helpers shared by resources
//! - [`error::JunosError`] - Error type of every fallible operation

pub mod codec;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod netconf;
pub mod resources;
pub mod secret;
pub mod session;
pub mod sim;
