extern crate base64;
extern crate clap;
#[macro_use]
extern crate derive_more;
extern crate core;
extern crate hex;
extern crate ring;
extern crate tokio;

pub mod base64util;
pub mod channel;
pub mod config;
pub mod delta;
pub mod error;
pub mod hash;
pub mod model;
pub mod notification;
pub mod persist;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod xml;
