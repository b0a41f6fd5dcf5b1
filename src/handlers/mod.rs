// src/handlers/mod.rs

pub mod attempts;
pub mod auth;
pub mod categories;
pub mod clients;
pub mod deliveries;
pub mod exams;
pub mod groups;
pub mod items;
pub mod questions;
pub mod reports;
pub mod scoring;
pub mod settings;
pub mod takers;
pub mod ws;
