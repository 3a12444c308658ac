use std::fmt;

/// Error type for every tracker operation.
///
/// Validation failures (`OutsideCanvas`, `NameConflict`, `NotOwner`, ...) are
/// reported to the caller and leave all state untouched.  `NoData` and
/// `TimeFrameTooShort` describe missing history rather than faults.
#[derive(Debug)]
pub enum TrackerError {
    InvalidUrl(String),
    ImageFetch(String),
    ImageDecode(String),
    /// The template has zero placeable pixels.
    OutsideCanvas,
    InvalidName(String),
    NameConflict(String),
    NotFound(String),
    NotOwner { name: String },
    NoData,
    TimeFrameTooShort,
    OutOfOrder { name: String },
    Render(String),
    Worker(String),
    Io(std::io::Error),
    Serialize(String),
    InvalidFormat(String),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::InvalidUrl(e) => write!(f, "Invalid template URL: {}", e),
            TrackerError::ImageFetch(e) => write!(f, "Couldn't fetch the template image: {}", e),
            TrackerError::ImageDecode(e) => write!(f, "Couldn't decode the template image: {}", e),
            TrackerError::OutsideCanvas => write!(
                f,
                "The template seems to be outside the canvas, make sure it's correctly positioned."
            ),
            TrackerError::InvalidName(e) => write!(f, "Invalid template name: {}", e),
            TrackerError::NameConflict(name) => {
                write!(f, "There is already a template with the name `{}`.", name)
            }
            TrackerError::NotFound(name) => {
                write!(f, "There is no template with the name `{}` in the tracker.", name)
            }
            TrackerError::NotOwner { name } => {
                write!(f, "You cannot edit the template `{}` because you don't own it.", name)
            }
            TrackerError::NoData => write!(f, "Couldn't find any data for this template."),
            TrackerError::TimeFrameTooShort => write!(f, "The time frame given is too short."),
            TrackerError::OutOfOrder { name } => {
                write!(f, "Progress record for `{}` is older than the latest one", name)
            }
            TrackerError::Render(e) => write!(f, "Rendering error: {}", e),
            TrackerError::Worker(e) => write!(f, "Worker error: {}", e),
            TrackerError::Io(e) => write!(f, "I/O error: {}", e),
            TrackerError::Serialize(e) => write!(f, "Serialization error: {}", e),
            TrackerError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(e: std::io::Error) -> Self {
        TrackerError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for TrackerError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        TrackerError::Serialize(e.to_string())
    }
}

impl From<image::ImageError> for TrackerError {
    fn from(e: image::ImageError) -> Self {
        TrackerError::ImageDecode(e.to_string())
    }
}

impl From<gif::EncodingError> for TrackerError {
    fn from(e: gif::EncodingError) -> Self {
        TrackerError::Render(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
