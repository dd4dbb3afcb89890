//! Plugin Runtime Tests
//!
//! Cross-module tests for the plugin runtime with mock implementations.
