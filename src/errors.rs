//! Error Types
//!
//! This module defines the error types used throughout the renderer.
//!
//! # Overview
//!
//! [`StrataError`] covers the hard failure modes (no adapter, device creation,
//! readback, invalid pass graph). [`ShaderError`] is the soft failure of a
//! single GPU program; it never aborts a frame; the orchestrator decides the
//! substitute behavior.
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, StrataError>`.
//!
//! ```rust,ignore
//! use strata::errors::Result;
//!
//! fn init() -> Result<()> {
//!     let ctx = strata::renderer::RendererContext::new_headless(&Default::default())?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::renderer::graph::ResourceId;

/// The main error type for the renderer.
#[derive(Error, Debug)]
pub enum StrataError {
    // ========================================================================
    // GPU Initialization Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    // ========================================================================
    // Readback Errors
    // ========================================================================
    /// A GPU → CPU transfer failed (map error or device poll error).
    #[error("Readback failed: {0}")]
    Readback(String),

    // ========================================================================
    // Pass Graph Errors
    // ========================================================================
    /// A pass reads a resource that no earlier pass writes this frame.
    #[error("Pass '{pass}' reads {resource:?} before any pass writes it")]
    ReadBeforeWrite {
        /// Name of the reading pass
        pass: &'static str,
        /// The unsatisfied resource
        resource: ResourceId,
    },

    /// Two passes declare a write to the same resource.
    #[error("{resource:?} is written by both '{first}' and '{second}'")]
    MultipleWriters {
        /// The contested resource
        resource: ResourceId,
        /// First declaring pass
        first: &'static str,
        /// Second declaring pass
        second: &'static str,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Settings (de)serialization error.
    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),

    /// A setting holds a value the renderer cannot honor.
    #[error("Invalid setting '{name}': {reason}")]
    InvalidSetting {
        /// Setting name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    // ========================================================================
    // Shader Errors
    // ========================================================================
    /// A shader failed where no fallback exists.
    #[error(transparent)]
    Shader(#[from] ShaderError),
}

/// Failure to turn a WGSL template into a usable GPU program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// The template (or one of its includes) does not exist.
    #[error("Shader '{0}' not found")]
    NotFound(String),

    /// Template expansion failed.
    #[error("Template error in '{name}': {message}")]
    Template {
        /// Program name
        name: String,
        /// Rendered minijinja error
        message: String,
    },

    /// WGSL front-end rejected the expanded source.
    #[error("Parse error in '{name}':\n{message}")]
    Parse {
        /// Program name
        name: String,
        /// Diagnostic with source spans
        message: String,
    },

    /// The module parsed but failed validation.
    #[error("Validation error in '{name}':\n{message}")]
    Validation {
        /// Program name
        name: String,
        /// Diagnostic with source spans
        message: String,
    },

    /// The device rejected a module or pipeline naga accepted (backend
    /// translation, binding mismatch with the pipeline layout).
    #[error("Device rejected '{name}': {message}")]
    Device {
        /// Program name
        name: String,
        /// wgpu error description
        message: String,
    },
}

impl ShaderError {
    /// Name of the program that failed.
    #[must_use]
    pub fn program(&self) -> &str {
        match self {
            Self::NotFound(name)
            | Self::Template { name, .. }
            | Self::Parse { name, .. }
            | Self::Validation { name, .. }
            | Self::Device { name, .. } => name,
        }
    }
}

// ============================================================================
// Convenient conversion implementations
// ============================================================================

impl From<wgpu::RequestAdapterError> for StrataError {
    fn from(err: wgpu::RequestAdapterError) -> Self {
        StrataError::AdapterRequestFailed(err.to_string())
    }
}

impl From<wgpu::BufferAsyncError> for StrataError {
    fn from(err: wgpu::BufferAsyncError) -> Self {
        StrataError::Readback(err.to_string())
    }
}

impl From<wgpu::PollError> for StrataError {
    fn from(err: wgpu::PollError) -> Self {
        StrataError::Readback(err.to_string())
    }
}

/// Alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;
