//! # MQTT Transport Adapter
//!
//! Owns the broker connection for a single shared topic. Commands go out with
//! fire-and-forget publishes; every publish received on the topic is forwarded,
//! in order, to one consumer channel.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and client id generation
//! ├── message_manager.rs  - Timestamped inbound message
//! └── mqtt_handler.rs     - Connection state machine, receive loop and publish
//! ```
//!
//! Connection, publish and subscribe failures are logged and recorded in the
//! adapter status. They never reach the toggle controller, which only notices
//! that no status arrives.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
