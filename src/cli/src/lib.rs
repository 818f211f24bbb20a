//! vpod CLI - pods of containers in a VM.

pub mod commands;
