//! Request validation and prompt shaping.

use std::path::Path;

use crate::config::RequestLimits;
use crate::error::ValidationError;

/// Appended to every prompt before synthesis.
pub const PROMPT_SUFFIX: &str =
    ", 3d render, centered object, white background, studio lighting, high quality, detailed";

/// Things the synthesizer should avoid.
pub const NEGATIVE_PROMPT: &str =
    "blurry, low quality, multiple objects, cluttered background, text, watermark";

/// Trim a prompt and check it against the limits.
///
/// `None` models a request without a prompt field at all.
pub fn validate_prompt(prompt: Option<&str>, limits: &RequestLimits) -> Result<String, ValidationError> {
    let prompt = prompt.ok_or(ValidationError::PromptMissing)?.trim();
    if prompt.is_empty() {
        return Err(ValidationError::PromptEmpty);
    }
    let length = prompt.chars().count();
    if length > limits.max_prompt_chars {
        return Err(ValidationError::PromptTooLong {
            length,
            max: limits.max_prompt_chars,
        });
    }
    Ok(prompt.to_string())
}

/// Check an upload's name and size; returns its lowercase extension.
pub fn validate_upload(
    filename: &str,
    size: usize,
    limits: &RequestLimits,
) -> Result<String, ValidationError> {
    if filename.trim().is_empty() {
        return Err(ValidationError::NoFile);
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !limits.allowed_extensions.iter().any(|allowed| *allowed == extension) {
        return Err(ValidationError::UnsupportedFileType {
            extension,
            allowed: limits.allowed_extensions.clone(),
        });
    }

    if size > limits.max_upload_bytes {
        return Err(ValidationError::FileTooLarge {
            size,
            max: limits.max_upload_bytes,
        });
    }
    Ok(extension)
}

/// Steer a validated prompt towards a single centered object.
pub fn enhance_prompt(prompt: &str) -> String {
    format!("{prompt}{PROMPT_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_is_trimmed() {
        let limits = RequestLimits::default();
        assert_eq!(
            validate_prompt(Some("  a red chair \n"), &limits).unwrap(),
            "a red chair"
        );
    }

    #[test]
    fn test_prompt_rejections() {
        let limits = RequestLimits::default();
        assert_eq!(
            validate_prompt(None, &limits),
            Err(ValidationError::PromptMissing)
        );
        assert_eq!(
            validate_prompt(Some("   "), &limits),
            Err(ValidationError::PromptEmpty)
        );

        let at_limit = "x".repeat(500);
        assert!(validate_prompt(Some(&at_limit), &limits).is_ok());
        let over = "x".repeat(501);
        assert_eq!(
            validate_prompt(Some(&over), &limits),
            Err(ValidationError::PromptTooLong {
                length: 501,
                max: 500
            })
        );
    }

    #[test]
    fn test_prompt_length_counts_chars() {
        let limits = RequestLimits::default();
        let accented = "é".repeat(500);
        assert!(validate_prompt(Some(&accented), &limits).is_ok());
    }

    #[test]
    fn test_upload_extension() {
        let limits = RequestLimits::default();
        assert_eq!(validate_upload("Photo.JPG", 10, &limits).unwrap(), "jpg");
        assert_eq!(validate_upload("shot.webp", 10, &limits).unwrap(), "webp");
        assert!(matches!(
            validate_upload("anim.gif", 10, &limits),
            Err(ValidationError::UnsupportedFileType { .. })
        ));
        assert!(matches!(
            validate_upload("noextension", 10, &limits),
            Err(ValidationError::UnsupportedFileType { .. })
        ));
        assert_eq!(validate_upload("", 10, &limits), Err(ValidationError::NoFile));
    }

    #[test]
    fn test_upload_size_cap() {
        let limits = RequestLimits::default();
        let max = limits.max_upload_bytes;
        assert!(validate_upload("a.png", max, &limits).is_ok());
        assert_eq!(
            validate_upload("a.png", max + 1, &limits),
            Err(ValidationError::FileTooLarge {
                size: max + 1,
                max
            })
        );
    }

    #[test]
    fn test_enhance_prompt() {
        let enhanced = enhance_prompt("a teapot");
        assert!(enhanced.starts_with("a teapot, 3d render"));
        assert!(enhanced.ends_with("detailed"));
    }
}
