//! Mealscan
//!
//! Turns an uploaded food photograph into a structured nutrition estimate via
//! a staged inference pipeline (food gate → dish recognition → nutrition
//! grounding → validation), driven by an asynchronous job state machine
//! backed by SQLite.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
