/// Input rejected before any state changed. Shown to the user as an alert.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Enter a username")]
    EmptyUsername,
    #[error("Please pick a video file")]
    MissingFile,
}
