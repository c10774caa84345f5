//! Toggle controller subsystem
//!
//! Keeps the local view of a remote on/off light in step with status messages
//! arriving on the shared topic.
//!
//! 1. [`state`] - Toggle state, commands and status report parsing
//! 2. [`debounce`] - Minimum spacing between user commands
//! 3. [`controller`] - Controller core and its serialized update loop
//! 4. [`controller_handle`] - Session API and lifecycle management
//!
//! # State Machine
//!
//! ```text
//! Unknown (loading) ──STATUS_ON/STATUS_OFF──► On ⇄ Off
//! ```
//!
//! The deferred STATUS query is sent once after startup; user toggles send the
//! inverse of the current state and flip it optimistically until the next report.

pub mod controller;
pub mod controller_handle;
pub mod debounce;
pub mod state;
