//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                        |
//! |-------------|-----------------------------------------|
//! | `project`   | `Init`                                  |
//! | `run`       | `Create`, `Orchestrate`, `Archive`      |
//! | `status`    | `Status`, `Log`, `List`                 |
//! | `watchdog`  | `Watchdog`                              |
//! | `config`    | `Config`                                |

pub mod config;
pub mod project;
pub mod run;
pub mod status;
pub mod watchdog;

pub use config::cmd_config;
pub use project::cmd_init;
pub use run::{cmd_archive, cmd_create, cmd_orchestrate};
pub use status::{cmd_list, cmd_log, cmd_status};
pub use watchdog::cmd_watchdog;
