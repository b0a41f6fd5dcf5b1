// src/models/mod.rs

pub mod attempt;
pub mod category;
pub mod client;
pub mod delivery;
pub mod exam;
pub mod question;
pub mod setting;
pub mod user;
