//! SetupFlow: unattended batch installation of Windows software packages
//!
//! Installers (`.exe`, `.msi`, `.zip`) are taken from a local directory,
//! run or extracted one at a time, and every batch leaves a timestamped log.

pub mod catalog;
pub mod config;
pub mod error;
pub mod install;
pub mod logs;
pub mod profiles;

pub use error::InstallError;
