//! Synthetic micro-population library
//!
//! Synthesizes census-consistent households and individuals for a study
//! area and equips every individual with a stochastic occupancy model
//! derived from time-use survey diaries.

pub mod config;
pub mod controls;
pub mod hipf;
pub mod markov;
pub mod person;
pub mod pipeline;
pub mod sample;
pub mod synthpop;
pub mod types;
