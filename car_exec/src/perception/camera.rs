//! Camera backends producing the frame handed to the vision service.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
#[cfg(feature = "v4l")]
use log::{info, warn};

use super::{process, CameraParams, CaptureError};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A source of still frames.
pub trait Camera {
    /// Capture one frame and store it on disk, returning its path.
    fn capture(&mut self) -> Result<PathBuf, CaptureError>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn capture(&mut self) -> Result<PathBuf, CaptureError> {
        (**self).capture()
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Chooses where each captured frame is stored.
#[derive(Debug, Clone)]
pub struct FrameNamer {
    dir: PathBuf,
    keep_frames: bool,
    count: u64,
}

/// Camera captured by running an external program.
///
/// The program is given the output path through the `{path}` placeholder and must exit
/// successfully having written the file.
pub struct CommandCamera {
    argv: Vec<String>,
    timeout: Duration,
    namer: FrameNamer,
}

/// Camera read directly from a V4L2 device.
///
/// The device is kept streaming between captures. If it cannot be opened, or fails, it is
/// reopened on the next capture.
#[cfg(feature = "v4l")]
pub struct V4lCamera {
    device: String,
    config: V4lConfig,
    warmup_frames: u32,
    camera: Option<rscam::Camera>,
    namer: FrameNamer,
}

#[cfg(feature = "v4l")]
#[derive(Debug, Clone, Copy)]
struct V4lConfig {
    resolution: (u32, u32),
    frame_rate: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FrameNamer {
    pub fn new<P: AsRef<Path>>(dir: P, keep_frames: bool) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            keep_frames,
            count: 0,
        }
    }

    /// Path for the next frame.
    pub fn next_path(&mut self) -> PathBuf {
        let path = if self.keep_frames {
            self.dir.join(format!("frame_{}.jpg", self.count))
        }
        else {
            self.dir.join("frame.jpg")
        };

        self.count += 1;
        path
    }
}

impl CommandCamera {
    pub fn new(params: &CameraParams, namer: FrameNamer) -> Self {
        Self {
            argv: params.command.clone(),
            timeout: util::time::secs_to_duration(params.timeout_s),
            namer,
        }
    }
}

impl Camera for CommandCamera {
    fn capture(&mut self) -> Result<PathBuf, CaptureError> {
        let path = self.namer.next_path();

        // Remove any previous frame so a silent failure can't reuse it
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| CaptureError::Save(path.clone(), e.to_string()))?;
        }

        let argv = process::substitute(&self.argv, "{path}", &path.to_string_lossy());
        process::run(&argv, None, self.timeout).map_err(CaptureError::Command)?;

        if !path.is_file() {
            return Err(CaptureError::NoFrame(path));
        }

        debug!("Captured frame {:?}", path);

        Ok(path)
    }
}

#[cfg(feature = "v4l")]
impl V4lCamera {
    /// Open and start the device.
    ///
    /// A device which cannot be opened yet is not an error here, the failure is reported by the
    /// first capture instead.
    pub fn new(params: &CameraParams, namer: FrameNamer) -> Self {
        let mut cam = Self {
            device: params.device.clone(),
            config: V4lConfig {
                resolution: (params.resolution[0], params.resolution[1]),
                frame_rate: params.frame_rate,
            },
            warmup_frames: params.warmup_frames,
            camera: None,
            namer,
        };

        if let Err(e) = cam.open() {
            warn!("{}, will retry on the next capture", e);
        }

        cam
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        let mut camera = rscam::Camera::new(&self.device)
            .map_err(|e| CaptureError::DeviceOpen(self.device.clone(), e))?;

        camera
            .start(&rscam::Config {
                interval: (1, self.config.frame_rate),
                resolution: self.config.resolution,
                format: b"MJPG",
                ..Default::default()
            })
            .map_err(|e| CaptureError::DeviceStart(e.to_string()))?;

        info!(
            "Camera {} started at {}x{} @ {} fps",
            self.device, self.config.resolution.0, self.config.resolution.1, self.config.frame_rate
        );

        self.camera = Some(camera);

        Ok(())
    }

    fn grab(&mut self) -> Result<PathBuf, CaptureError> {
        if self.camera.is_none() {
            self.open()?;
        }

        let camera = match self.camera.as_ref() {
            Some(c) => c,
            None => return Err(CaptureError::DeviceStart(self.device.clone())),
        };

        // Let exposure settle and flush stale buffered frames
        for _ in 0..self.warmup_frames {
            camera.capture().map_err(CaptureError::Grab)?;
        }

        let frame = camera.capture().map_err(CaptureError::Grab)?;

        let img = image::load_from_memory_with_format(&frame[..], image::ImageFormat::Jpeg)
            .map_err(|e| CaptureError::Decode(e.to_string()))?;

        let path = self.namer.next_path();
        img.save(&path)
            .map_err(|e| CaptureError::Save(path.clone(), e.to_string()))?;

        debug!("Captured frame {:?}", path);

        Ok(path)
    }
}

#[cfg(feature = "v4l")]
impl Camera for V4lCamera {
    fn capture(&mut self) -> Result<PathBuf, CaptureError> {
        let result = self.grab();

        // Reopen the device on the next capture after any failure
        if result.is_err() {
            self.camera = None;
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("robocar_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn command_params(script: &str) -> CameraParams {
        CameraParams {
            command: vec!["sh".into(), "-c".into(), script.into()],
            timeout_s: 5.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_namer() {
        let mut single = FrameNamer::new("/tmp/imgs", false);
        assert_eq!(single.next_path(), PathBuf::from("/tmp/imgs/frame.jpg"));
        assert_eq!(single.next_path(), PathBuf::from("/tmp/imgs/frame.jpg"));

        let mut keep = FrameNamer::new("/tmp/imgs", true);
        assert_eq!(keep.next_path(), PathBuf::from("/tmp/imgs/frame_0.jpg"));
        assert_eq!(keep.next_path(), PathBuf::from("/tmp/imgs/frame_1.jpg"));
    }

    #[test]
    fn test_command_camera() {
        let dir = temp_dir("cmd_cam");

        // `sh -c script name arg1` puts the output path in $1
        let mut cam = CommandCamera::new(
            &command_params("echo jpeg > \"$1\""),
            FrameNamer::new(&dir, false),
        );
        cam.argv.push("grab".into());
        cam.argv.push("{path}".into());

        let path = cam.capture().unwrap();
        assert_eq!(path, dir.join("frame.jpg"));
        assert!(path.is_file());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_command_camera_failures() {
        let dir = temp_dir("cmd_cam_fail");

        let mut cam = CommandCamera::new(&command_params("exit 1"), FrameNamer::new(&dir, false));
        assert!(matches!(cam.capture(), Err(CaptureError::Command(_))));

        // Succeeds but never writes the file
        let mut cam = CommandCamera::new(&command_params("true"), FrameNamer::new(&dir, false));
        assert!(matches!(cam.capture(), Err(CaptureError::NoFrame(_))));

        std::fs::remove_dir_all(dir).ok();
    }

    #[cfg(feature = "v4l")]
    #[test]
    fn test_missing_device_is_capture_fault() {
        let dir = temp_dir("v4l_missing");
        let params = CameraParams {
            device: String::from("/nonexistent/video9"),
            warmup_frames: 0,
            ..Default::default()
        };

        // Construction succeeds, each capture reports the open failure
        let mut cam = V4lCamera::new(&params, FrameNamer::new(&dir, false));
        assert!(matches!(cam.capture(), Err(CaptureError::DeviceOpen(_, _))));
        assert!(matches!(cam.capture(), Err(CaptureError::DeviceOpen(_, _))));

        std::fs::remove_dir_all(dir).ok();
    }
}
