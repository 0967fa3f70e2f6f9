//! Configuration management for packetlog

pub mod settings;

pub use settings::{
    ClientConfig, FramingSettings, LoggingSettings, ServerConfig, ServerSettings,
    ShutdownSettings, StorageSettings, TimestampSettings,
};
