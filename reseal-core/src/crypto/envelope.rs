//! Key-label envelope around sealed bodies
//!
//! Format: `[magic(4)][label_len(1)][label(label_len)][sealed body]`
//!
//! Ciphertext without the magic prefix predates labelling and is treated
//! as a legacy record whose generation must be discovered by trial.

use super::CryptoError;

pub const MAGIC: &[u8; 4] = b"RSL1";
pub const MAX_LABEL_LEN: usize = u8::MAX as usize;

const HEADER_FIXED_LEN: usize = MAGIC.len() + 1;

/// Wrap a sealed body with its key label
pub fn wrap(label: &str, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return Err(CryptoError::Seal(format!(
            "key label must be 1..={} bytes, got {}",
            MAX_LABEL_LEN,
            label.len()
        )));
    }

    let mut out = Vec::with_capacity(HEADER_FIXED_LEN + label.len() + sealed.len());
    out.extend_from_slice(MAGIC);
    out.push(label.len() as u8);
    out.extend_from_slice(label.as_bytes());
    out.extend_from_slice(sealed);
    Ok(out)
}

/// Split ciphertext into its optional label and the sealed body
///
/// Returns `(None, whole input)` for legacy ciphertext.
pub fn split(ciphertext: &[u8]) -> Result<(Option<&str>, &[u8]), CryptoError> {
    if !ciphertext.starts_with(MAGIC) {
        return Ok((None, ciphertext));
    }

    let label_len = *ciphertext
        .get(MAGIC.len())
        .ok_or_else(|| CryptoError::Malformed("envelope header truncated".to_string()))?
        as usize;

    let body_start = HEADER_FIXED_LEN + label_len;
    if label_len == 0 || ciphertext.len() < body_start {
        return Err(CryptoError::Malformed("envelope label truncated".to_string()));
    }

    let label = std::str::from_utf8(&ciphertext[HEADER_FIXED_LEN..body_start])
        .map_err(|_| CryptoError::Malformed("envelope label is not UTF-8".to_string()))?;

    Ok((Some(label), &ciphertext[body_start..]))
}

/// Read the label without validating the body
pub fn peek_label(ciphertext: &[u8]) -> Option<String> {
    split(ciphertext)
        .ok()
        .and_then(|(label, _)| label.map(str::to_string))
}
