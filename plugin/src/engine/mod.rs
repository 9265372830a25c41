//! The per-button polling/registration lifecycle engine.
//!
//! One [`Registration`] per backend binds a [`Service`] implementation to
//! the host event stream: it keeps per-button state in a [`ButtonRegistry`],
//! drives one shared refresh loop per action through a [`Supervisor`], and
//! funnels every fetch outcome through a uniform render/error path.

mod dispatcher;
mod registry;
mod render;
mod service;
mod supervisor;

pub use dispatcher::{ActionDispatch, Registration};
pub use registry::{ButtonRegistry, ButtonState};
pub use render::{render_count, set_loading, DEFAULT_STATE, GOLD_STATE};
pub use service::Service;
pub use supervisor::Supervisor;
