//! # Configuration Module
//!
//! This module provides the API, generation, compression and converter settings for avatar generation.

pub mod config;

pub use config::{
    ApiConfig, CompressionConfig, ConverterConfig, GenerationDefaults, GeneratorConfig,
    ENV_API_BASE_URL, ENV_API_KEY,
};
