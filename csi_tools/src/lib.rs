//! Operator tooling for the OBS parallel filesystem plugin: the cloud
//! configuration file, logging setup, and the commands `csi_ctl` runs.

pub mod commands;
pub mod config;
pub mod logging;
