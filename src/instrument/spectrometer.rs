//! OceanOptics HR4000-style spectrometer.
//!
//! The vendor driver is a blocking binary library, modelled here as the
//! [`SpectrometerDriver`] trait. Each call is assumed to be atomic and
//! correct; this module only serialises access, bounds arguments and types the
//! results.
//!
//! Driver calls run on the blocking pool (`spawn_blocking` + `blocking_lock`)
//! so that a long integration never stalls the async runtime.

use crate::config::{InstrumentDefinition, InstrumentKind};
use crate::error::LabError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Vendor driver boundary.
pub trait SpectrometerDriver: Send {
    fn serial_number(&self) -> anyhow::Result<String>;
    /// Position of this device in the driver's enumeration.
    fn device_index(&self) -> anyhow::Result<usize>;
    fn pixel_count(&self) -> anyhow::Result<usize>;

    /// Integration time in microseconds.
    fn integration_time(&self) -> anyhow::Result<u32>;
    fn set_integration_time(&mut self, micros: u32) -> anyhow::Result<()>;
    fn min_integration_time(&self) -> anyhow::Result<u32>;
    fn max_integration_time(&self) -> anyhow::Result<u32>;

    fn scans_to_average(&self) -> anyhow::Result<u32>;
    fn set_scans_to_average(&mut self, scans: u32) -> anyhow::Result<()>;

    fn electrical_dark_correction(&self) -> anyhow::Result<bool>;
    fn set_electrical_dark_correction(&mut self, enabled: bool) -> anyhow::Result<()>;
    fn nonlinearity_correction(&self) -> anyhow::Result<bool>;
    fn set_nonlinearity_correction(&mut self, enabled: bool) -> anyhow::Result<()>;
    fn stray_light_correction(&self) -> anyhow::Result<bool>;

    /// Wavelength calibration: intercept, first, second and third order.
    fn calibration_coefficients(&self) -> anyhow::Result<[f64; 4]>;

    /// Acquires one (averaged) spectrum. Blocks for the integration time.
    fn spectrum(&mut self) -> anyhow::Result<Vec<f64>>;
    fn is_saturated(&self) -> anyhow::Result<bool>;
    fn is_spectrum_valid(&self) -> anyhow::Result<bool>;
    fn stop_averaging(&mut self) -> anyhow::Result<()>;

    fn close(&mut self) -> anyhow::Result<()>;
}

/// One acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub acquired_at: DateTime<Utc>,
    pub intensities: Vec<f64>,
    pub saturated: bool,
}

/// Pixel wavelengths from the calibration polynomial.
pub fn wavelengths_from_coefficients(coefficients: &[f64; 4], pixels: usize) -> Vec<f64> {
    let [c0, c1, c2, c3] = *coefficients;
    (0..pixels)
        .map(|pixel| {
            let p = pixel as f64;
            c0 + p * (c1 + p * (c2 + p * c3))
        })
        .collect()
}

/// Serialised access to one spectrometer.
pub struct Spectrometer {
    id: String,
    driver: Arc<Mutex<Box<dyn SpectrometerDriver>>>,
}

impl Spectrometer {
    pub fn new(id: impl Into<String>, driver: impl SpectrometerDriver + 'static) -> Self {
        let id = id.into();
        info!(instrument = %id, "spectrometer opened");
        Self {
            id,
            driver: Arc::new(Mutex::new(Box::new(driver))),
        }
    }

    /// Wraps `driver` for a configuration entry. When the entry names a
    /// serial number, the driver must report the same one.
    pub async fn open_configured(
        definition: &InstrumentDefinition,
        driver: impl SpectrometerDriver + 'static,
    ) -> Result<Self, LabError> {
        definition.require(InstrumentKind::Spectrometer)?;
        let spectrometer = Self::new(definition.id.as_str(), driver);
        if let Some(expected) = &definition.serial_number {
            let found = spectrometer.serial_number().await?;
            if &found != expected {
                return Err(LabError::Configuration(format!(
                    "Instrument '{}' expects spectrometer {}, driver reports {}",
                    definition.id, expected, found
                )));
            }
        }
        Ok(spectrometer)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, LabError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SpectrometerDriver) -> anyhow::Result<T> + Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        debug!(instrument = %self.id, op, "driver call");
        tokio::task::spawn_blocking(move || {
            let mut guard = driver.blocking_lock();
            f(&mut **guard)
        })
        .await
        .map_err(|e| LabError::Driver(anyhow::anyhow!("{} task failed: {}", op, e)))?
        .map_err(|e| LabError::Driver(e.context(op)))
    }

    pub async fn serial_number(&self) -> Result<String, LabError> {
        self.call("serial number", |d| d.serial_number()).await
    }

    pub async fn device_index(&self) -> Result<usize, LabError> {
        self.call("device index", |d| d.device_index()).await
    }

    pub async fn integration_time(&self) -> Result<u32, LabError> {
        self.call("integration time", |d| d.integration_time()).await
    }

    /// Device integration time limits in microseconds.
    pub async fn integration_time_limits(&self) -> Result<(u32, u32), LabError> {
        self.call("integration time limits", |d| {
            Ok((d.min_integration_time()?, d.max_integration_time()?))
        })
        .await
    }

    /// Sets the integration time after checking it against the device limits.
    pub async fn set_integration_time(&self, micros: u32) -> Result<(), LabError> {
        let (min, max) = self.integration_time_limits().await?;
        if !(min..=max).contains(&micros) {
            return Err(LabError::ArgumentOutOfRange {
                name: "integration time",
                value: i64::from(micros),
                min: i64::from(min),
                max: i64::from(max),
            });
        }
        self.call("set integration time", move |d| d.set_integration_time(micros))
            .await
    }

    pub async fn scans_to_average(&self) -> Result<u32, LabError> {
        self.call("scans to average", |d| d.scans_to_average()).await
    }

    pub async fn set_scans_to_average(&self, scans: u32) -> Result<(), LabError> {
        if scans == 0 {
            return Err(LabError::ArgumentOutOfRange {
                name: "scans to average",
                value: 0,
                min: 1,
                max: i64::from(u32::MAX),
            });
        }
        self.call("set scans to average", move |d| d.set_scans_to_average(scans))
            .await
    }

    pub async fn electrical_dark_correction(&self) -> Result<bool, LabError> {
        self.call("dark correction", |d| d.electrical_dark_correction())
            .await
    }

    pub async fn set_electrical_dark_correction(&self, enabled: bool) -> Result<(), LabError> {
        self.call("set dark correction", move |d| {
            d.set_electrical_dark_correction(enabled)
        })
        .await
    }

    pub async fn nonlinearity_correction(&self) -> Result<bool, LabError> {
        self.call("nonlinearity correction", |d| d.nonlinearity_correction())
            .await
    }

    pub async fn set_nonlinearity_correction(&self, enabled: bool) -> Result<(), LabError> {
        self.call("set nonlinearity correction", move |d| {
            d.set_nonlinearity_correction(enabled)
        })
        .await
    }

    pub async fn stray_light_correction(&self) -> Result<bool, LabError> {
        self.call("stray light correction", |d| d.stray_light_correction())
            .await
    }

    pub async fn calibration_coefficients(&self) -> Result<[f64; 4], LabError> {
        self.call("calibration coefficients", |d| d.calibration_coefficients())
            .await
    }

    /// Wavelength of every pixel, in nm.
    pub async fn wavelengths(&self) -> Result<Vec<f64>, LabError> {
        self.call("wavelengths", |d| {
            Ok(wavelengths_from_coefficients(
                &d.calibration_coefficients()?,
                d.pixel_count()?,
            ))
        })
        .await
    }

    /// Acquires a spectrum and reads its saturation flag in the same call.
    pub async fn spectrum(&self) -> Result<Spectrum, LabError> {
        let (intensities, saturated) = self
            .call("spectrum", |d| {
                let intensities = d.spectrum()?;
                Ok((intensities, d.is_saturated()?))
            })
            .await?;
        Ok(Spectrum {
            acquired_at: Utc::now(),
            intensities,
            saturated,
        })
    }

    pub async fn is_saturated(&self) -> Result<bool, LabError> {
        self.call("saturation", |d| d.is_saturated()).await
    }

    pub async fn is_spectrum_valid(&self) -> Result<bool, LabError> {
        self.call("spectrum validity", |d| d.is_spectrum_valid()).await
    }

    pub async fn stop_averaging(&self) -> Result<(), LabError> {
        self.call("stop averaging", |d| d.stop_averaging()).await
    }

    pub async fn close(self) -> Result<(), LabError> {
        self.call("close", |d| d.close()).await?;
        info!(instrument = %self.id, "spectrometer closed");
        Ok(())
    }
}

impl std::fmt::Debug for Spectrometer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spectrometer").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polynomial_wavelengths() {
        let wl = wavelengths_from_coefficients(&[200.0, 0.5, 0.0, 0.0], 4);
        assert_eq!(wl, vec![200.0, 200.5, 201.0, 201.5]);

        let wl = wavelengths_from_coefficients(&[0.0, 0.0, 1.0, 1.0], 3);
        assert_eq!(wl, vec![0.0, 2.0, 12.0]);
    }
}
