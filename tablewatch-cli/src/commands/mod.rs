pub mod confidence;
pub mod config;
pub mod masking;
pub mod run;
