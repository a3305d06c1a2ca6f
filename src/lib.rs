//! Command/response protocol core for serial laboratory instruments.
//!
//! The crate drives a Newport Cornerstone 130 monochromator and a Tecan
//! XLP6000 syringe pump over line-oriented serial links, and wraps an
//! OceanOptics spectrometer driver behind the same error model.
//!
//! - [`transport`] moves lines to and from one port, with a hard read timeout.
//! - [`protocol`] holds the per-dialect framing, decoding and fault
//!   classification.
//! - [`session`] runs the transaction: validate, write, settle, read, decode,
//!   classify.
//! - [`instrument`] exposes typed getters and setters per instrument.
//!
//! # Example
//!
//! ```no_run
//! use rust_labio::instrument::Monochromator;
//! use rust_labio::transport::ConnectionParams;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rust_labio::LabError> {
//!     let params = ConnectionParams::new("/dev/ttyUSB0");
//!     let mono = Monochromator::connect("mono", &params).await?;
//!     mono.set_wavelength(550).await?;
//!     println!("at {} nm", mono.wavelength().await?);
//!     mono.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod mock;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{DeviceError, LabError, LabResult};
pub use session::{InstrumentSession, Outcome};
