//! Calculator Vault - File Type Classification
//!
//! Content classes are derived purely from the file extension.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Content classification of a hidden file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileType {
    Image,
    Video,
    Audio,
    Document,
}

impl FileType {
    /// Classify a lowercase or mixed-case extension (with or without the leading dot)
    pub fn from_extension(extension: &str) -> Self {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => Self::Image,
            "mp4" | "avi" | "mkv" | "mov" | "wmv" | "flv" | "webm" | "3gp" => Self::Video,
            "mp3" | "wav" | "flac" | "aac" | "ogg" | "m4a" => Self::Audio,
            _ => Self::Document,
        }
    }

    /// Classify a path by its extension
    pub fn of_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Document)
    }

    /// Extension restored when decrypting a file that has no metadata
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Image => ".jpg",
            Self::Video => ".mp4",
            Self::Audio => ".mp3",
            Self::Document => ".txt",
        }
    }

    /// Sub-directory name used for this class under the hidden root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
            Self::Audio => "audio",
            Self::Document => "documents",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Video => "VIDEO",
            Self::Audio => "AUDIO",
            Self::Document => "DOCUMENT",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IMAGE" => Ok(Self::Image),
            "VIDEO" => Ok(Self::Video),
            "AUDIO" => Ok(Self::Audio),
            "DOCUMENT" => Ok(Self::Document),
            _ => Err(VaultError::UnknownFileType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(FileType::from_extension("JPG"), FileType::Image);
        assert_eq!(FileType::from_extension(".webp"), FileType::Image);
        assert_eq!(FileType::from_extension("3gp"), FileType::Video);
        assert_eq!(FileType::from_extension("m4a"), FileType::Audio);
        assert_eq!(FileType::from_extension("pdf"), FileType::Document);
        assert_eq!(FileType::from_extension(""), FileType::Document);

        assert_eq!(FileType::of_path(Path::new("/x/clip.MOV")), FileType::Video);
        assert_eq!(FileType::of_path(Path::new("/x/README")), FileType::Document);
    }

    #[test]
    fn test_parse_and_display() {
        for t in [FileType::Image, FileType::Video, FileType::Audio, FileType::Document] {
            assert_eq!(t.to_string().parse::<FileType>().unwrap(), t);
        }
        assert_eq!("audio".parse::<FileType>().unwrap(), FileType::Audio);
        assert!("SPREADSHEET".parse::<FileType>().is_err());
    }

    #[test]
    fn test_default_extensions() {
        assert_eq!(FileType::Image.default_extension(), ".jpg");
        assert_eq!(FileType::Document.default_extension(), ".txt");
        assert_eq!(FileType::from_extension(FileType::Video.default_extension()), FileType::Video);
    }
}
