//! # cppdeps - C/C++ dependency and magic-flag analysis
//!
//! cppdeps discovers the full transitive dependency graph of C/C++ source
//! files with no build script: it runs its own conditional-compilation
//! preprocessor over each file, follows the include graph, harvests build
//! flags embedded as `//#KEY=value` comment annotations, and memoizes the
//! whole thing in a content-addressed two-tier cache.
//!
//! ## How a query flows
//!
//! 1. [`engine::Engine::closure`] is asked for the dependency closure of a
//!    source file.
//! 2. The [`hunter`] walks the include graph, threading the macro state
//!    through every file in traversal order.
//! 3. Per file, the [`cache`] answers from the invariant tier (content hash
//!    only) or the variant tier (content hash + the fingerprint of just the
//!    macros that file reads); on a miss the [`preprocessor`] replays the
//!    [`analyzer`]'s directive stream against the current macro state.
//!
//! ## Module organization
//!
//! - [`engine`] - Root object owning all long-lived state
//! - [`hunter`] - Header-dependency walker and implied-source discovery
//! - [`cache`] - Two-tier content-addressed preprocessing cache
//! - [`preprocessor`] - Conditional-compilation interpreter
//! - [`analyzer`] - Single-pass file scanner
//! - [`eval`] - `#if` expression evaluator with read-set tracking
//! - [`macros`] - Partitioned macro environment
//! - [`magic`] - Magic-flag classification and aggregation
//! - [`config`] - Options record and variant profiles
//! - [`content`] - Content registry and line index
//! - [`diagnostics`] - Error taxonomy

/// Single-pass file scanner producing directives, magic tokens, and spans.
pub mod analyzer;

/// Two-tier preprocessing cache (invariant + variant).
pub mod cache;

/// Options record and variant profile loading.
pub mod config;

/// Content registry: interned file bytes keyed by digest.
pub mod content;

/// Error taxonomy and diagnostics.
pub mod diagnostics;

/// Engine root owning registry, cache, and configuration.
pub mod engine;

/// `#if` expression evaluation over the macro state.
pub mod eval;

/// Header-dependency walker.
pub mod hunter;

/// Partitioned macro environment and fingerprints.
pub mod macros;

/// Magic `//#KEY=value` flag handling.
pub mod magic;

/// Conditional-compilation preprocessor.
pub mod preprocessor;
