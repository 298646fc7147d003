//! Presence-notification sink.
//!
//! The reporter announces host lifecycle events here. Nothing consumes them
//! yet; the functions are deliberate no-ops kept so a future consumer (an
//! MQTT bridge, for instance) only has to fill in the bodies.

use pnet::util::MacAddr;

pub fn new_host(_ip: &str, _mac: Option<MacAddr>) {}

pub fn host_online(_ip: &str, _mac: Option<MacAddr>) {}

pub fn host_offline(_ip: &str, _mac: Option<MacAddr>) {}
