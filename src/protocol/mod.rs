//! Instrument dialects.
//!
//! A dialect is the command vocabulary, framing and error-reporting style of
//! one instrument family. The transaction in [`crate::session`] is the same for
//! every dialect; only three steps vary:
//!
//! - **Framer**: turn a [`Command`] into a line and split response lines into
//!   echo, payload and (where the dialect embeds it) a status byte.
//! - **Decoder**: the per-command [`Decode`] rule that types the payload.
//! - **Classifier**: decide whether the exchange faulted, either from the
//!   embedded status byte or by asking the device over a side channel.

pub mod command;
pub mod cornerstone;
pub mod decode;
pub mod value;
pub mod xlp6000;

pub use command::{Arg, Command};
pub use decode::Decode;
pub use value::{DecodedValue, ShutterState, Symbol, ValvePosition};

use crate::error::{DeviceError, LabError};
use crate::session::Link;
use async_trait::async_trait;

/// One exchange after framing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// The line restating the command, for dialects that echo.
    pub echo: Option<String>,
    /// The line or substring carrying data.
    pub payload: Option<String>,
    /// Status byte embedded in the response, for dialects that embed one.
    pub status: Option<u8>,
}

/// Encodes commands and splits responses for one dialect.
pub trait Framer: Send + Sync {
    /// Full command line including the dialect terminator.
    fn encode(&self, command: &Command) -> Vec<u8>;

    /// Splits the raw lines read for `command` into a [`Frame`].
    fn frame(&self, command: &Command, lines: Vec<Vec<u8>>) -> Result<Frame, LabError>;
}

/// Learns whether an exchange faulted.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Returns the device fault for `frame`, if any. Side-channel classifiers
    /// may issue further exchanges on `link`; they run inside the same
    /// transaction, so nothing else reaches the wire in between.
    async fn classify(
        &self,
        frame: &Frame,
        link: &mut Link<'_>,
    ) -> Result<Option<DeviceError>, LabError>;
}

/// A framer and classifier pair.
pub struct Dialect {
    name: &'static str,
    framer: Box<dyn Framer>,
    classifier: Box<dyn Classifier>,
}

impl Dialect {
    pub fn new(
        name: &'static str,
        framer: impl Framer + 'static,
        classifier: impl Classifier + 'static,
    ) -> Self {
        Self {
            name,
            framer: Box::new(framer),
            classifier: Box::new(classifier),
        }
    }

    /// Cornerstone monochromator: echoed lines, `STB?`/`ERROR?` side channel.
    pub fn cornerstone() -> Self {
        Self::new(
            "cornerstone",
            cornerstone::CornerstoneFramer,
            cornerstone::StatusByteClassifier,
        )
    }

    /// Tecan XLP6000 pump at `address`: framed single line, embedded status.
    pub fn xlp6000(address: char) -> Self {
        Self::new(
            "xlp6000",
            xlp6000::Xlp6000Framer::new(address),
            xlp6000::EmbeddedStatusClassifier,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn framer(&self) -> &dyn Framer {
        self.framer.as_ref()
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }
}

impl std::fmt::Debug for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialect").field("name", &self.name).finish()
    }
}
