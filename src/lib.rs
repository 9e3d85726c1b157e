//! tzfailover library - primary/secondary time-zone provider arbitration
//!
//! This module exports internal components for integration testing.

pub mod cli;
pub mod config;
pub mod controller;
pub mod domain;
pub mod event;
pub mod provider;
pub mod suggestion;
