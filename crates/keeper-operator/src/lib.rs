//! Keeper operator: the reconciliation driver for checks and backups

pub mod controller;
pub mod controller_runner;
