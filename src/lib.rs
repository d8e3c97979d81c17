pub mod action;
pub mod analog;
pub mod config;
pub mod controller;
pub mod engine;
pub mod gesture;
pub mod mapping;
pub mod output;
