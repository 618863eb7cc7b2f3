//! Per-file transfer state machines.
//!
//! Outgoing and incoming files have different lattices and legal
//! operations, so they are two concrete types sharing the [`Unit`]
//! capability trait rather than one type parameterized by direction.

mod incoming;
mod normalize;
mod outgoing;

use std::{fmt::Debug, path::Path};

use uuid::Uuid;

pub use incoming::{IncomingState, IncomingUnit};
pub use normalize::normalize;
pub use outgoing::{LoadedContent, OutgoingState, OutgoingUnit};

pub type UnitId = Uuid;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// What both kinds of units expose to a batch.
pub trait Unit {
    /// Position in the unit's lattice. The derived `Ord` follows
    /// declaration order, which is the order of progress; `Default` is
    /// the least advanced state.
    type State: Copy + Ord + Default + Debug;

    fn id(&self) -> UnitId;
    fn content_type(&self) -> &str;
    fn size(&self) -> u64;
    fn remote_path(&self) -> Option<&str>;
    fn state(&self) -> Self::State;
    /// Short human-readable reference used in logs.
    fn label(&self) -> String;
}

/// Guesses a MIME type from the extension of a file name or path.
pub fn content_type_for<P: AsRef<Path>>(name: P) -> &'static str {
    let extension = name
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("txt") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("mp4") => "video/mp4",
        _ => OCTET_STREAM,
    }
}

/// File extension (with the leading dot) matching a MIME type, used when
/// naming staged blobs and downloaded files.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/bmp" => ".bmp",
        "text/plain" => ".txt",
        "application/pdf" => ".pdf",
        "video/mp4" => ".mp4",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("photo.JPG", "image/jpeg")]
    #[case("/tmp/x/shot.jpeg", "image/jpeg")]
    #[case("scan.png", "image/png")]
    #[case("notes.txt", "text/plain")]
    #[case("archive.tar.gz", OCTET_STREAM)]
    #[case("no_extension", OCTET_STREAM)]
    fn guesses_content_type(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(content_type_for(name), expected);
    }

    #[test]
    fn extension_matches_guess() {
        for name in ["a.jpg", "a.png", "a.gif", "a.pdf", "a.mp4"] {
            let ext = extension_for(content_type_for(name));
            assert!(name.ends_with(ext), "{name} vs {ext}");
        }
        assert_eq!(extension_for(OCTET_STREAM), "");
    }
}
