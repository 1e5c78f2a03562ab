//! # Perception
//!
//! The perception adapter turns the world in front of the car into a single [`Command`]. It is
//! made of two halves:
//!
//! - A [`Camera`] capturing a still frame to disk.
//! - A [`Vision`] service answering with free text for that frame.
//!
//! The answer is always coerced into a valid command by [`coerce_decision`], so that whatever the
//! vision service says the control loop only ever receives one of `F B L R S`.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod camera;
mod process;
mod vision;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use std::time::Duration;

use comms_if::cmd::Command;
use log::warn;
use serde::Deserialize;

#[cfg(feature = "v4l")]
pub use camera::V4lCamera;
pub use camera::{Camera, CommandCamera, FrameNamer};
pub use process::ProcessError;
pub use vision::{CommandVision, Vision, DRIVING_PROMPT};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Capture and interpretation of the scene ahead.
pub trait Perception {
    /// Capture a frame, returning the path it was stored at.
    fn capture(&mut self) -> Result<PathBuf, CaptureError>;

    /// Decide on a command for the given frame.
    fn infer(&mut self, image: &Path) -> Result<Command, InferenceError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A [`Perception`] built from a camera and a vision service.
pub struct Adapter<C, V> {
    camera: C,
    vision: V,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraParams {
    /// Which camera implementation to use
    pub backend: CameraBackend,

    /// V4L2 device path
    pub device: String,

    /// Frame resolution, width then height
    pub resolution: [u32; 2],

    /// Device frame rate
    pub frame_rate: u32,

    /// Frames discarded before each capture
    pub warmup_frames: u32,

    /// Program used by the command backend, `{path}` is replaced by the output path
    pub command: Vec<String>,

    /// Maximum run time of the capture program
    pub timeout_s: f64,

    /// Keep every frame rather than overwriting a single file
    pub keep_frames: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionParams {
    /// Helper program, `{image}` is replaced by the frame path
    pub command: Vec<String>,

    /// Maximum time to wait for an answer
    pub timeout_s: f64,

    /// Write the driving prompt to the helper's standard input
    pub send_prompt: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackend {
    V4l,
    Command,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Cannot open camera {0}: {1}")]
    DeviceOpen(String, std::io::Error),

    #[error("Cannot start the camera stream: {0}")]
    DeviceStart(String),

    #[error("Failed to grab a frame: {0}")]
    Grab(std::io::Error),

    #[error("Failed to decode the frame: {0}")]
    Decode(String),

    #[error("Cannot save the frame to {0:?}: {1}")]
    Save(PathBuf, String),

    #[error("Capture program failed: {0}")]
    Command(ProcessError),

    #[error("Capture program did not produce {0:?}")]
    NoFrame(PathBuf),

    #[error("Camera backend not available: {0}")]
    Unsupported(String),
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Image {0:?} does not exist")]
    ImageMissing(PathBuf),

    #[error("Vision helper failed: {0}")]
    HelperFailed(ProcessError),

    #[error("Vision helper gave no answer within {0:?}")]
    Timeout(Duration),

    #[error("Vision answer is not valid UTF-8")]
    NonUtf8,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            backend: CameraBackend::V4l,
            device: String::from("/dev/video0"),
            resolution: [640, 480],
            frame_rate: 30,
            warmup_frames: 30,
            command: Vec::new(),
            timeout_s: 5.0,
            keep_frames: false,
        }
    }
}

impl Default for VisionParams {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_s: 15.0,
            send_prompt: true,
        }
    }
}

impl<C: Camera, V: Vision> Adapter<C, V> {
    pub fn new(camera: C, vision: V) -> Self {
        Self { camera, vision }
    }
}

impl<C: Camera, V: Vision> Perception for Adapter<C, V> {
    fn capture(&mut self) -> Result<PathBuf, CaptureError> {
        self.camera.capture()
    }

    fn infer(&mut self, image: &Path) -> Result<Command, InferenceError> {
        let answer = self.vision.query(image)?;
        Ok(coerce_decision(&answer))
    }
}

impl<P: Perception + ?Sized> Perception for Box<P> {
    fn capture(&mut self) -> Result<PathBuf, CaptureError> {
        (**self).capture()
    }

    fn infer(&mut self, image: &Path) -> Result<Command, InferenceError> {
        (**self).infer(image)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Map a raw vision answer onto a command.
///
/// Surrounding whitespace and case are ignored. Anything other than exactly one of `F B L R S`
/// becomes [`Command::Stop`].
pub fn coerce_decision(raw: &str) -> Command {
    match raw.trim().to_uppercase().parse() {
        Ok(cmd) => cmd,
        Err(_) => {
            warn!("Invalid decision {:?} from vision, stopping instead", raw);
            Command::Stop
        }
    }
}

/// Build the perception adapter described by the parameters.
///
/// Frames are stored in `images_dir`.
pub fn from_params<P: AsRef<Path>>(
    camera: &CameraParams,
    vision: &VisionParams,
    images_dir: P,
) -> Result<Adapter<Box<dyn Camera>, CommandVision>, CaptureError> {
    let namer = FrameNamer::new(images_dir, camera.keep_frames);

    let cam: Box<dyn Camera> = match camera.backend {
        #[cfg(feature = "v4l")]
        CameraBackend::V4l => Box::new(V4lCamera::new(camera, namer)),
        #[cfg(not(feature = "v4l"))]
        CameraBackend::V4l => {
            return Err(CaptureError::Unsupported(String::from(
                "built without the `v4l` feature",
            )))
        }
        CameraBackend::Command => Box::new(CommandCamera::new(camera, namer)),
    };

    Ok(Adapter::new(cam, CommandVision::new(vision)))
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    struct FixedVision(&'static str);

    impl Vision for FixedVision {
        fn query(&mut self, _image: &Path) -> Result<String, InferenceError> {
            Ok(self.0.to_string())
        }
    }

    struct FixedCamera;

    impl Camera for FixedCamera {
        fn capture(&mut self) -> Result<PathBuf, CaptureError> {
            Ok(PathBuf::from("frame.jpg"))
        }
    }

    #[test]
    fn test_coerce_decision() {
        assert_eq!(coerce_decision("F"), Command::Forward);
        assert_eq!(coerce_decision(" l\n"), Command::Left);
        assert_eq!(coerce_decision("r"), Command::Right);
        assert_eq!(coerce_decision("B"), Command::Backward);
        assert_eq!(coerce_decision("X"), Command::Stop);
        assert_eq!(coerce_decision(""), Command::Stop);
        assert_eq!(coerce_decision("FL"), Command::Stop);
        assert_eq!(coerce_decision("Forward"), Command::Stop);
    }

    #[test]
    fn test_adapter_coerces() {
        let mut p = Adapter::new(FixedCamera, FixedVision("turn left please"));
        let frame = p.capture().unwrap();
        assert_eq!(p.infer(&frame).unwrap(), Command::Stop);

        let mut p = Adapter::new(FixedCamera, FixedVision("  r  "));
        assert_eq!(p.infer(&frame).unwrap(), Command::Right);
    }

    #[test]
    fn test_params_from_toml() {
        let cam: CameraParams = util::params::from_str(
            "backend = \"command\"\ncommand = [\"grab\", \"{path}\"]\nkeep_frames = true\n",
        )
        .unwrap();
        assert_eq!(cam.backend, CameraBackend::Command);
        assert_eq!(cam.warmup_frames, 30);
        assert!(cam.keep_frames);

        let vis: VisionParams = util::params::from_str("command = [\"ask\"]\n").unwrap();
        assert_eq!(vis.timeout_s, 15.0);
    }

    #[cfg(feature = "v4l")]
    #[test]
    fn test_missing_camera_builds_adapter() {
        let camera = CameraParams {
            device: String::from("/nonexistent/video9"),
            warmup_frames: 0,
            ..Default::default()
        };
        let dir = std::env::temp_dir().join("car_exec_missing_camera");

        let mut adapter = from_params(&camera, &VisionParams::default(), &dir).unwrap();
        assert!(matches!(adapter.capture(), Err(CaptureError::DeviceOpen(_, _))));
    }

    proptest! {
        #[test]
        fn prop_coerced_decision_always_valid(raw in ".*") {
            let cmd = coerce_decision(&raw);
            prop_assert!(Command::ALL.contains(&cmd));

            let t = raw.trim().to_uppercase();
            if t.len() == 1 {
                if let Some(c) = Command::from_byte(t.as_bytes()[0]) {
                    prop_assert_eq!(cmd, c);
                }
            }
        }

        #[test]
        fn prop_valid_letters_preserved(
            letter in prop::sample::select(vec!['F', 'B', 'L', 'R', 'S', 'f', 'b', 'l', 'r', 's']),
            pad_l in "[ \t\r\n]{0,3}",
            pad_r in "[ \t\r\n]{0,3}",
        ) {
            let raw = format!("{}{}{}", pad_l, letter, pad_r);
            let expected = Command::from_byte(letter.to_ascii_uppercase() as u8);
            prop_assert_eq!(Some(coerce_decision(&raw)), expected);
        }
    }
}
