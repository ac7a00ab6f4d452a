// src/lib.rs
pub mod data {
    pub mod utility;
    pub mod store;
}

pub mod config;
pub mod pipeline;
pub mod report;
