//! Output file naming and local-to-public path mapping.
//!
//! Convention: `{identifier}_{index:03}.{ext}`. Individual images of a
//! batch use indices `1..=N`; the composite grid uses index `0`.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Index reserved for the composite grid of a batch.
pub const GRID_INDEX: u32 = 0;

/// Build the filename for one output image.
///
/// ```
/// use fate_core::naming::image_filename;
///
/// assert_eq!(image_filename("abc", 1, "webp"), "abc_001.webp");
/// assert_eq!(image_filename("abc", 0, "webp"), "abc_000.webp");
/// assert_eq!(image_filename("abc", 123, "png"), "abc_123.png");
/// ```
pub fn image_filename(identifier: &str, index: u32, extension: &str) -> String {
    format!("{identifier}_{index:03}.{extension}")
}

/// Full local path for one output image under `folder`.
pub fn image_path(folder: &Path, identifier: &str, index: u32, extension: &str) -> PathBuf {
    folder.join(image_filename(identifier, index, extension))
}

/// Translate a local storage path into its publicly served URL.
///
/// The configured `folder` prefix is replaced by the `domain` prefix.
/// Either prefix being unset is a configuration error; a path outside
/// the folder is rejected.
pub fn public_path(
    local: &Path,
    folder: Option<&Path>,
    domain: Option<&str>,
) -> Result<String, CoreError> {
    let folder = folder
        .ok_or_else(|| CoreError::Configuration("COMFYUI_FOLDER_PATH is not set".into()))?;
    let domain = domain
        .ok_or_else(|| CoreError::Configuration("COMFYUI_DOMAIN_PATH is not set".into()))?;

    let relative = local.strip_prefix(folder).map_err(|_| {
        CoreError::Validation(format!(
            "{} is not inside the output folder {}",
            local.display(),
            folder.display()
        ))
    })?;

    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    Ok(format!("{}/{}", domain.trim_end_matches('/'), relative))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn filename_pads_index_to_three_digits() {
        assert_eq!(image_filename("prompt-1", 7, "webp"), "prompt-1_007.webp");
    }

    #[test]
    fn filename_keeps_wide_indices() {
        assert_eq!(image_filename("p", 1234, "png"), "p_1234.png");
    }

    #[test]
    fn image_path_joins_folder() {
        let path = image_path(Path::new("/srv/out"), "abc", 2, "webp");
        assert_eq!(path, PathBuf::from("/srv/out/abc_002.webp"));
    }

    #[test]
    fn public_path_substitutes_prefix() {
        let url = public_path(
            Path::new("/srv/out/abc_001.webp"),
            Some(Path::new("/srv/out/")),
            Some("https://img.example.com/fate/"),
        )
        .unwrap();
        assert_eq!(url, "https://img.example.com/fate/abc_001.webp");
    }

    #[test]
    fn public_path_requires_domain() {
        let result = public_path(
            Path::new("/srv/out/abc_001.webp"),
            Some(Path::new("/srv/out")),
            None,
        );
        assert_matches!(result, Err(CoreError::Configuration(msg)) if msg.contains("DOMAIN"));
    }

    #[test]
    fn public_path_requires_folder() {
        let result = public_path(Path::new("/srv/out/a.webp"), None, Some("https://x"));
        assert_matches!(result, Err(CoreError::Configuration(msg)) if msg.contains("FOLDER"));
    }

    #[test]
    fn public_path_rejects_foreign_directory() {
        let result = public_path(
            Path::new("/tmp/abc_001.webp"),
            Some(Path::new("/srv/out")),
            Some("https://x"),
        );
        assert_matches!(result, Err(CoreError::Validation(_)));
    }
}
