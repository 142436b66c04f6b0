//! CLI command implementations.
//!
//! | Module       | Commands handled |
//! |--------------|------------------|
//! | `serve`      | `Serve`          |
//! | `publish`    | `Publish`        |
//! | `check_args` | `CheckArgs`      |
//! | `config`     | `Config`         |

pub mod check_args;
pub mod config;
pub mod publish;
pub mod serve;

pub use check_args::cmd_check_args;
pub use config::cmd_config;
pub use publish::cmd_publish;
pub use serve::cmd_serve;
