//! Vision service backends answering with a driving decision.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::Path;
use std::time::Duration;

use log::debug;

use super::{
    process::{self, ProcessError},
    InferenceError, VisionParams,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Instructions given to the vision service with every frame.
pub const DRIVING_PROMPT: &str = "\
You are driving a small robot car. The image is taken by a camera on the front of the car.

Steer towards the largest open gap or clear path in view, and turn early rather than waiting \
until a wall is directly ahead.

Rules, in order of priority:
1. Consider the whole image, left, centre and right.
2. Find where the most open space is.
3. Open space straight ahead: answer F.
4. Open space to the left, or the path bends left: answer L.
5. Open space to the right, or the path bends right: answer R.
6. Dead end with no gap ahead: answer B.
7. Obstacle closer than about 20 cm: answer S.

Answer with exactly one letter out of F, B, L, R or S and nothing else.
";

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A service turning an image into a free text driving answer.
pub trait Vision {
    /// Ask for a decision on the given image, returning the raw answer.
    fn query(&mut self, image: &Path) -> Result<String, InferenceError>;
}

impl<V: Vision + ?Sized> Vision for Box<V> {
    fn query(&mut self, image: &Path) -> Result<String, InferenceError> {
        (**self).query(image)
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Vision service reached through a helper program.
///
/// The helper gets the image path through the `{image}` placeholder (appended if absent), the
/// prompt on its standard input, and must print its answer on standard output.
pub struct CommandVision {
    argv: Vec<String>,
    timeout: Duration,
    prompt: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CommandVision {
    pub fn new(params: &VisionParams) -> Self {
        Self {
            argv: params.command.clone(),
            timeout: util::time::secs_to_duration(params.timeout_s),
            prompt: if params.send_prompt {
                Some(DRIVING_PROMPT.to_string())
            }
            else {
                None
            },
        }
    }
}

impl Vision for CommandVision {
    fn query(&mut self, image: &Path) -> Result<String, InferenceError> {
        if !image.is_file() {
            return Err(InferenceError::ImageMissing(image.to_path_buf()));
        }

        let argv = process::substitute(&self.argv, "{image}", &image.to_string_lossy());

        let stdout = process::run(
            &argv,
            self.prompt.as_ref().map(|p| p.as_bytes()),
            self.timeout,
        )
        .map_err(|e| match e {
            ProcessError::Timeout(t) => InferenceError::Timeout(t),
            e => InferenceError::HelperFailed(e),
        })?;

        let answer = String::from_utf8(stdout).map_err(|_| InferenceError::NonUtf8)?;

        debug!("Vision answer: {:?}", answer.trim());

        Ok(answer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn image_file() -> PathBuf {
        let path = std::env::temp_dir().join(format!("robocar_vision_{}.jpg", std::process::id()));
        std::fs::write(&path, b"jpeg").unwrap();
        path
    }

    fn vision(script: &str, timeout_s: f64) -> CommandVision {
        CommandVision::new(&VisionParams {
            command: vec!["sh".into(), "-c".into(), script.into(), "vision".into()],
            timeout_s,
            send_prompt: true,
        })
    }

    #[test]
    fn test_answer_returned() {
        let image = image_file();

        // The image path is appended as $1, the prompt arrives on stdin
        let mut v = vision("test -f \"$1\" && grep -q 'exactly one letter' && echo ' l '", 5.0);
        assert_eq!(v.query(&image).unwrap(), " l \n");
    }

    #[test]
    fn test_helper_errors() {
        let image = image_file();

        assert!(matches!(
            vision("exit 2", 5.0).query(&image),
            Err(InferenceError::HelperFailed(_))
        ));
        assert!(matches!(
            vision("exec sleep 10", 0.2).query(&image),
            Err(InferenceError::Timeout(_))
        ));
        assert!(matches!(
            vision("echo F", 5.0).query(Path::new("/nonexistent/frame.jpg")),
            Err(InferenceError::ImageMissing(_))
        ));
    }
}
