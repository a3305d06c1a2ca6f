//! Instrument drivers built on [`crate::session::InstrumentSession`].
//!
//! Each driver exposes typed getter/setter pairs. Every pair delegates to
//! exactly one transaction, so the remote attribute layer above can map them
//! one to one.

pub mod monochromator;
pub mod pump;
pub mod spectrometer;

pub use monochromator::Monochromator;
pub use pump::{InitDirection, InitOptions, Report, SyringePump};
pub use spectrometer::{Spectrometer, SpectrometerDriver, Spectrum};
