//! Plain text and word-processor document decoding.

use crate::error::PipelineError;
use crate::sanitize::{alphabetic_ratio, clean_text};

const MIN_CONTENT_CHARS: usize = 50;
const MIN_ALPHABETIC_RATIO: f32 = 0.3;

/// True when the declared type is a binary word-processor format that we
/// decode on a best-effort basis.
pub fn is_word_processor(media_type: &str) -> bool {
    let media_type = media_type.to_ascii_lowercase();
    media_type.contains("msword")
        || media_type.contains("wordprocessingml")
        || media_type.contains("officedocument")
        || media_type == "application/rtf"
}

/// Decodes uploaded bytes as text.
///
/// Plain text decodes directly (lossy when not valid UTF-8). Binary
/// word-processor formats get control characters stripped and must then
/// pass a content-quality gate, so garbage never reaches the chunker.
pub fn extract(bytes: &[u8], media_type: &str) -> Result<String, PipelineError> {
    if is_word_processor(media_type) {
        return extract_word_processor(bytes);
    }

    let decoded = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    };
    Ok(clean_text(&decoded))
}

fn extract_word_processor(bytes: &[u8]) -> Result<String, PipelineError> {
    let decoded = String::from_utf8_lossy(bytes);
    let mut kept = String::with_capacity(decoded.len() / 2);
    for ch in decoded.chars() {
        if ch == '\u{FFFD}' {
            // Lossy replacement runs become single spaces.
            if !kept.ends_with(' ') {
                kept.push(' ');
            }
        } else if ch == '\n' || ch == '\t' || !ch.is_control() {
            kept.push(ch);
        }
    }
    let cleaned = clean_text(&kept);

    if cleaned.chars().count() < MIN_CONTENT_CHARS {
        return Err(PipelineError::ContentQuality {
            detail: format!(
                "decoded word-processor content too short ({} chars)",
                cleaned.chars().count()
            ),
        });
    }
    let ratio = alphabetic_ratio(&cleaned);
    if ratio < MIN_ALPHABETIC_RATIO {
        return Err(PipelineError::ContentQuality {
            detail: format!("alphabetic ratio {ratio:.2} below {MIN_ALPHABETIC_RATIO}"),
        });
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through_sanitized() {
        let text = extract(b"hello\r\nworld\0", "text/plain").expect("extract");
        assert_eq!(text, "hello\nworld");
    }

    #[test]
    fn binary_word_processor_garbage_is_rejected() {
        // Control bytes, digits, and punctuation; no letters anywhere.
        let bytes: Vec<u8> = (0u8..0x40).cycle().take(4096).collect();
        let err = extract(&bytes, "application/msword").expect_err("garbage");
        assert!(matches!(err, PipelineError::ContentQuality { .. }));
    }

    #[test]
    fn readable_word_processor_content_survives() {
        let mut bytes = vec![0x01, 0x02, 0x03];
        bytes.extend_from_slice(
            "This report covers the quarterly numbers in considerable detail for review."
                .repeat(2)
                .as_bytes(),
        );
        let text = extract(&bytes, "application/msword").expect("extract");
        assert!(text.contains("quarterly numbers"));
    }
}
