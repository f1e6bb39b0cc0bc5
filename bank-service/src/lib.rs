//! Bank Service - Monetary accounts and atomic money transfers.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
