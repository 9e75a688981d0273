//! Browser substrate for tabgate.
//!
//! Everything above this crate drives pages through the [`DriverPage`] trait;
//! the concrete implementation speaks CDP through chromiumoxide. The
//! anti-fingerprint launcher of the original deployment is an external
//! collaborator — [`BrowserLauncher`] is its seam, [`ChromiumLauncher`] the
//! stock implementation.

pub mod auth_gate;
pub mod cdp;
pub mod error;
pub mod launch;
pub mod noop;
pub mod page;

pub use auth_gate::{AuthGate, AuthGuard};
pub use cdp::{CdpBrowser, CdpPage, ChromiumLauncher};
pub use error::{PageError, PageErrorKind, PageResult};
pub use launch::{BrowserHandle, BrowserLauncher, LaunchSpec, ProxyScheme, ProxySpec};
pub use noop::{NoopBrowser, NoopLauncher, NoopPage};
pub use page::{Cookie, DriverPage, NavigationEvent};
