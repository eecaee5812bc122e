pub mod averaging;
pub mod commands;
pub mod configure;
pub mod decoder;
pub mod integration;
