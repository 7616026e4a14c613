// src/config/mod.rs
pub mod catalog;
pub mod settings;
