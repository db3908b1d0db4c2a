//! CLI command implementations.
//!
//! | Module          | Commands handled |
//! |-----------------|------------------|
//! | `panel`         | `Panel`          |
//! | `control_plane` | `ControlPlane`   |

pub mod control_plane;
pub mod panel;

pub use control_plane::cmd_control_plane;
pub use panel::cmd_panel;
