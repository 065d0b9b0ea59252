#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("need at least {required} usable views, got {got}")]
    InsufficientViews { required: usize, got: usize },
    #[error("view {view} ({label}): board-to-image homography is degenerate")]
    DegenerateHomography { view: usize, label: String },
    #[error("view {view} ({label}) has image size {got:?}, expected {expected:?}")]
    ImageSizeMismatch {
        view: usize,
        label: String,
        expected: [u32; 2],
        got: [u32; 2],
    },
    #[error("closed-form initialization failed: {0}")]
    InitializationFailed(&'static str),
    #[error("optimizer failed: {0}")]
    SolverFailed(String),
    #[error("normal matrix is singular; parameter uncertainties are undefined")]
    SingularJacobian,
    #[error("optimizer produced an invalid camera: {0}")]
    InvalidSolution(String),
}
