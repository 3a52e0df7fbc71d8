//! Sonya Watch BLE telemetry client.
//!
//! The watch pushes framed events over a GATT notify characteristic (TX) and
//! takes ASCII commands on a write characteristic (RX). This crate decodes
//! the frames, keeps running totals for audio recordings (optionally saving
//! the raw PCM), and runs the duplex session with guaranteed teardown.
//!
//! # Pieces
//!
//! - [`protocol`]: frame codec, event classification, RX command vocabulary.
//! - [`StreamAccumulator`]: per-recording chunk/byte counters and audio sink.
//! - [`locator::discover`]: find a watch by advertised name.
//! - [`Session`]: connect, subscribe, pump telemetry, write commands, tear down.
//! - [`CommandSource`]: scripted commands and/or interactive lines.
//!
//! The BlueZ transport lives behind the `bluez` feature; everything else runs
//! against the [`GattLink`]/[`Connector`]/[`Scanner`] traits.

pub mod accumulator;
#[cfg(feature = "bluez")]
pub mod bluetooth;
pub mod commands;
pub mod config;
mod errors;
pub mod locator;
pub mod logging;
pub mod protocol;
pub mod session;

pub use accumulator::{RecordingSummary, StreamAccumulator};
#[cfg(feature = "bluez")]
pub use bluetooth::{BluezLink, BluezTransport};
pub use commands::{CommandSource, Origin, OutboundCommand};
pub use config::ClientConfig;
pub use errors::*;
pub use locator::{Advertisement, Scanner};
pub use protocol::{DeviceCommand, EventKind, Frame, RecordingMeta};
pub use session::{
    Connector, Console, GattLink, Notifications, Session, SessionEnd, SessionState, Shutdown,
    ShutdownTrigger,
};
