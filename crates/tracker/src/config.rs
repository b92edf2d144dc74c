use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use frame_ingest::{PixelFormat, StreamConfig, StreamRole};

/// Settings for one tracking pipeline.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub role: StreamRole,
    pub buffer_count: usize,
    pub exposure_us: Option<u32>,
    /// Physical marker edge length in meters.
    pub marker_size: f64,
    pub preview_stride: u64,
    pub preview_width: u32,
    pub calibration_path: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            pixel_format: PixelFormat::Grey8,
            role: StreamRole::Viewfinder,
            buffer_count: 4,
            exposure_us: Some(5_000),
            marker_size: 0.05,
            preview_stride: 10,
            preview_width: 320,
            calibration_path: None,
        }
    }
}

const USAGE: &str = "Usage: tracker [marker-size-m] [--width <px>] [--height <px>] \
[--marker-size <m>] [--calibration <path>] [--exposure-us <us>] [--buffers <n>] \
[--preview-stride <n>]";

impl TrackerConfig {
    /// Parse flags (with a positional marker-size fallback) over the
    /// defaults.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 0;
        while idx < args.len() {
            match args[idx].as_str() {
                "--width" => {
                    idx += 1;
                    config.width = parse_value(args.get(idx), "--width")?;
                    idx += 1;
                }
                "--height" => {
                    idx += 1;
                    config.height = parse_value(args.get(idx), "--height")?;
                    idx += 1;
                }
                "--marker-size" => {
                    idx += 1;
                    config.marker_size = parse_value(args.get(idx), "--marker-size")?;
                    idx += 1;
                }
                "--calibration" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--calibration requires a value"))?;
                    config.calibration_path = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--exposure-us" => {
                    idx += 1;
                    config.exposure_us = Some(parse_value(args.get(idx), "--exposure-us")?);
                    idx += 1;
                }
                "--buffers" => {
                    idx += 1;
                    config.buffer_count = parse_value(args.get(idx), "--buffers")?;
                    idx += 1;
                }
                "--preview-stride" => {
                    idx += 1;
                    config.preview_stride = parse_value(args.get(idx), "--preview-stride")?;
                    idx += 1;
                }
                "--help" | "-h" => bail!(USAGE),
                arg if arg.starts_with('-') => bail!("Unrecognised flag: {arg}\n{USAGE}"),
                other => {
                    positional.push(other.to_string());
                    idx += 1;
                }
            }
        }

        if let Some(size) = positional.first() {
            config.marker_size = size
                .parse::<f64>()
                .with_context(|| "marker size must be a number in meters".to_string())?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("stream size must be nonzero");
        }
        if self.buffer_count == 0 {
            bail!("--buffers must be at least 1");
        }
        if !(self.marker_size.is_finite() && self.marker_size > 0.0) {
            bail!("marker size must be a positive number of meters");
        }
        if self.preview_stride == 0 {
            bail!("--preview-stride must be at least 1");
        }
        Ok(())
    }

    /// The stream parameters requested from the capture device.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            role: self.role,
            exposure_us: self.exposure_us,
            buffer_count: self.buffer_count,
        }
    }
}

fn parse_value<T: std::str::FromStr>(value: Option<&String>, flag: &str) -> Result<T> {
    value
        .ok_or_else(|| anyhow!("{flag} requires a value"))?
        .parse::<T>()
        .map_err(|_| anyhow!("{flag} has an invalid value"))
}
