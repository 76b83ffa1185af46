//! File name canonicalization.
//!
//! Four name roles exist for every stored file: the original name supplied by the uploader,
//! the name used in URLs, the name on disk and the name shown to end users. Today the last
//! three are the same canonical string; they keep separate functions so that one of them can
//! diverge (for example to add percent-encoding for URLs) without touching the others.

use crate::error::StorageError;
use std::fmt;
use std::ops::Deref;

/// Longest canonical name, in characters.
pub const MAX_NAME_CHARS: usize = 250;

/// Replacement for names that canonicalize to nothing.
pub const EMPTY_NAME: &str = "EMPTY";

const REPLACEMENT: char = '_';
const DEVICE_PREFIX: &str = "DEV";

const FORBIDDEN: &[char] =
    &['\\', ':', '\'', '[', ']', '/', '"', ',', '<', '>', '&', '^', '$', '+', '*', '?', ';', '|'];

const DEVICES: [&str; 4] = ["CON", "PRN", "AUX", "NUL"];
const NUMBERED_DEVICES: [&str; 2] = ["COM", "LPT"];

/// Maps an arbitrary user-supplied string to a name that is safe on every common filesystem.
///
/// Steps, in order:
/// 1. keep the first [`MAX_NAME_CHARS`] characters;
/// 2. drop trailing dots and spaces;
/// 3. replace `\ : ' [ ] / " , < > & ^ $ + * ? ; |` and control characters with `_`;
/// 4. rename reserved device names (`CON`, `NUL`, `COM1`, `lpt9.txt`, ...) to `DEV` plus the
///    original suffix;
/// 5. map the empty string to [`EMPTY_NAME`].
///
/// ```rust
/// use limbo_storage::canonicalize;
///
/// assert_eq!(canonicalize("report: Q1/Q2?.pdf"), "report_ Q1_Q2_.pdf");
/// assert_eq!(canonicalize("con.txt"), "DEV.txt");
/// assert_eq!(canonicalize("..."), "EMPTY");
/// ```
#[must_use]
pub fn canonicalize(raw: &str) -> String {
    let truncated: String = raw.chars().take(MAX_NAME_CHARS).collect();
    let trimmed = truncated.trim_end_matches(['.', ' ']);
    let replaced: String =
        trimmed.chars().map(|c| if is_forbidden(c) { REPLACEMENT } else { c }).collect();
    let remapped = remap_device(replaced);

    if remapped.is_empty() { EMPTY_NAME.to_owned() } else { remapped }
}

/// Canonicalizes `raw` and checks that the result is a fixed point of [`canonicalize`].
///
/// # Errors
/// Returns [`StorageError::NameCanonicalization`] if canonicalizing the result again changes
/// it. The algorithm is idempotent, so this only fires on a regression.
pub fn canonicalize_verified(raw: &str) -> Result<CanonicalName, StorageError> {
    let first = canonicalize(raw);
    let second = canonicalize(&first);
    if first != second {
        return Err(StorageError::NameCanonicalization {
            message: format!("'{raw}' canonicalized to '{first}', then to '{second}'").into(),
            context: None,
        });
    }
    Ok(CanonicalName(first))
}

/// Original (uploaded) name to disk name.
///
/// # Errors
/// See [`canonicalize_verified`].
pub fn original_to_disk(original: &str) -> Result<CanonicalName, StorageError> {
    canonicalize_verified(original)
}

/// URL name to disk name.
///
/// # Errors
/// See [`canonicalize_verified`].
pub fn url_to_disk(url_name: &str) -> Result<CanonicalName, StorageError> {
    canonicalize_verified(url_name)
}

#[must_use]
pub fn disk_to_url(disk_name: &CanonicalName) -> String {
    disk_name.0.clone()
}

#[must_use]
pub fn disk_to_display(disk_name: &CanonicalName) -> String {
    disk_name.0.clone()
}

/// A file name that is a fixed point of [`canonicalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalName(String);

impl CanonicalName {
    /// Accepts `name` only if it is already canonical, as names read back from disk must be.
    ///
    /// # Errors
    /// Returns [`StorageError::NameCanonicalization`] if canonicalizing `name` would change it.
    pub fn from_canonical(name: &str) -> Result<Self, StorageError> {
        let canonical = canonicalize_verified(name)?;
        if canonical.0 != name {
            return Err(StorageError::NameCanonicalization {
                message: format!("'{name}' is not canonical (expected '{canonical}')").into(),
                context: None,
            });
        }
        Ok(canonical)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<&str> for CanonicalName {
    type Error = StorageError;

    fn try_from(raw: &str) -> Result<Self, StorageError> {
        canonicalize_verified(raw)
    }
}

impl TryFrom<String> for CanonicalName {
    type Error = StorageError;

    fn try_from(raw: String) -> Result<Self, StorageError> {
        canonicalize_verified(&raw)
    }
}

impl Deref for CanonicalName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CanonicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{1f}') || FORBIDDEN.contains(&c)
}

/// Length in bytes of a leading device name, if `name` starts with one.
///
/// Only an ASCII digit `0`-`9` completes a numbered device such as `COM1`. Decimal digits from
/// other scripts (`COM١`, `LPT٣`) are not matched, and such names pass through unchanged even
/// though a `\d` regular expression would treat them as devices.
fn device_stem_len(name: &str) -> Option<usize> {
    let stem = name.get(..3)?;
    if DEVICES.iter().any(|d| stem.eq_ignore_ascii_case(d)) {
        return Some(3);
    }
    let numbered = NUMBERED_DEVICES.iter().any(|d| stem.eq_ignore_ascii_case(d))
        && name.as_bytes().get(3).is_some_and(u8::is_ascii_digit);
    numbered.then_some(4)
}

/// Never makes the name longer than `MAX_NAME_CHARS`: `DEV` replaces a stem of 3 or 4 chars.
fn remap_device(name: String) -> String {
    let Some(len) = device_stem_len(&name) else {
        return name;
    };
    let suffix = &name[len..];
    if suffix.is_empty() || suffix.starts_with('.') {
        format!("{DEVICE_PREFIX}{suffix}")
    } else {
        name
    }
}
