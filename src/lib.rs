pub mod baton_config;
pub mod config;
pub mod errors;
pub mod gates;
pub mod init;
pub mod logging;
pub mod machine;
pub mod mailbox;
pub mod manifest;
pub mod orchestrator;
pub mod packet;
pub mod ui;
pub mod watchdog;
