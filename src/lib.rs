//! Client for the local web interface of ÖkOFEN Pellematic pellet heaters.
//!
//! The controller exposes a cookie-authenticated JSON endpoint. A
//! [`PellematicClient`] logs in on demand, fetches batches of parameters,
//! decodes their packed string values and writes settings back.

pub mod catalog;
mod client;
mod config;
pub mod decode;
mod error;
mod logger;
mod protocol;
mod session;
mod types;

pub use client::{PellematicClient, PellematicClientBuilder};
pub use config::{ClientConfig, LoginForm, SuccessSignal, normalize_base_url};
pub use error::{Error, ErrorKind, Result};
pub use logger::MessageLogMode;
pub use types::*;
