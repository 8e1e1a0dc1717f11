pub mod buffer;
pub mod camera;
pub mod capture;
pub mod error;
pub mod pipeline;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use buffer::{ExternalBuffer, GraphicsAllocator, HeapAllocator, NativeHandle, Resize};
pub use camera::{CameraParam, ControlRange, EvsCamera, StreamState};
pub use capture::{BufferUsage, FrameDescriptor, PixelFormat};
pub use error::EvsError;
pub use pipeline::{ChannelTransport, FrameTransport, StreamEvent, StreamMessage};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix of environment overrides, e.g. `EVS__STREAM__TARGET_FPS=30`
pub const ENV_PREFIX: &str = "EVS";

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: BufferUsage,
    pub vendor_flags: u32,
    /// Opaque characteristics blob reported in the camera description
    #[serde(default)]
    pub metadata: Vec<u8>,
    #[serde(default)]
    pub controls: Vec<ControlRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub target_fps: u32,
    pub max_buffers_in_flight: u32,
    /// Buffers the demo server asks for before starting
    pub initial_buffer_count: u32,
    pub transport_queue_depth: usize,
}

impl Config {
    /// Defaults, then the TOML file at `path`, then `EVS__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                id: "/dev/evs0".into(),
                width: 640,
                height: 480,
                format: PixelFormat::Rgba8888,
                usage: BufferUsage::CAMERA_DEFAULT,
                vendor_flags: 0xFFFF_FFFF, // Arbitrary test value
                metadata: Vec::new(),
                controls: vec![
                    ControlRange {
                        param: CameraParam::Brightness,
                        min: 0,
                        max: 255,
                        step: 1,
                    },
                    ControlRange {
                        param: CameraParam::Contrast,
                        min: 0,
                        max: 255,
                        step: 1,
                    },
                    ControlRange {
                        param: CameraParam::Sharpness,
                        min: 0,
                        max: 255,
                        step: 1,
                    },
                ],
            },
            stream: StreamConfig {
                target_fps: capture::DEFAULT_TARGET_FPS,
                max_buffers_in_flight: buffer::MAX_BUFFERS_IN_FLIGHT,
                initial_buffer_count: 4,
                transport_queue_depth: 8,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_without_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = Config::load(None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn file_then_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
id = "/dev/evs3"
width = 1280
height = 720

[[camera.controls]]
param = "absolute_zoom"
min = 100
max = 400
step = 10

[stream]
target_fps = 10
"#
        )
        .unwrap();

        std::env::set_var("EVS__STREAM__INITIAL_BUFFER_COUNT", "6");
        let config = Config::load(Some(file.path()));
        std::env::remove_var("EVS__STREAM__INITIAL_BUFFER_COUNT");
        let config = config.unwrap();

        assert_eq!(config.camera.id, "/dev/evs3");
        assert_eq!((config.camera.width, config.camera.height), (1280, 720));
        assert_eq!(config.camera.format, PixelFormat::Rgba8888);
        assert_eq!(
            config.camera.controls,
            vec![ControlRange {
                param: CameraParam::AbsoluteZoom,
                min: 100,
                max: 400,
                step: 10,
            }]
        );
        assert_eq!(config.stream.target_fps, 10);
        assert_eq!(config.stream.initial_buffer_count, 6);
        assert_eq!(config.stream.max_buffers_in_flight, 100);
    }
}
