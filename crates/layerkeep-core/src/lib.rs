//! # layerkeep-core
//!
//! Core logic of the layerkeep OCI poststop hook.
//!
//! When a container stops, the hook inspects the container's declarative
//! configuration, locates the writable upper layer of each overlay mount
//! targeted by an archive annotation, and durably preserves that layer
//! before the mount namespace is torn down. This crate provides:
//! - **Directives**: translating annotation key/value pairs into typed
//!   archive directives with validation and default-filling.
//! - **Resolution**: recovering the on-disk upper directory of a mount,
//!   either from its declared options (privileged, direct overlay) or by
//!   cross-referencing live fuse mount-helper processes (unprivileged,
//!   bind-indirected).
//! - **Execution**: recursive copy or deterministic tar+gzip streaming
//!   with ownership rewriting, plus the optional success sentinel.

pub mod archive;
pub mod config;
pub mod directive;
pub mod error;
pub mod fuse;
pub mod hook;
pub mod resolve;
