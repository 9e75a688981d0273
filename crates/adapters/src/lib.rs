//! Adapter layer: the contract every web-service driver satisfies, the
//! navigation-handler chain, the registry that maps model ids onto adapters,
//! and the built-in selector-driven web-chat driver.
//!
//! Adapters are a fixed set of values implementing [`Adapter`], keyed by a
//! string kind read from configuration. New upstream services are new
//! configuration sections over an existing driver or new `Adapter` impls.

pub mod contract;
pub mod navigation;
pub mod registry;
pub mod webchat;

pub use contract::{Adapter, AdapterContext, AdapterSettings, WorkerSettings};
pub use navigation::{spawn_navigation_chain, NavigationContext, NavigationHandler};
pub use registry::{AdapterRegistry, ModelKey};
pub use webchat::WebChatAdapter;
