//! Shared world and scripted collaborators

pub mod world;

pub use world::{Script, Scripted, TestWorld};
