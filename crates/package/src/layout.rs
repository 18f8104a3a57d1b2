//! Package directory layout, file naming and URL rewriting.
//!
//! ```text
//! <package>/
//!   artifacts/<artifact name>.yaml
//!   tools/<tool name>            (Offline packages only)
//!   manifest.json
//! ```

use artools_core::sha256_hex;
use std::collections::{BTreeMap, HashSet};

/// Directory holding artifact definitions.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Directory holding embedded tool binaries.
pub const TOOLS_DIR: &str = "tools";

/// Manifest file name at the package root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Make `name` safe as a single path component on every platform.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Package-relative path of a tool file, as written into artifact text.
#[must_use]
pub fn local_tool_path(file_name: &str) -> String {
    format!("{TOOLS_DIR}/{file_name}")
}

/// Assign unique file names to `(key, preferred name)` pairs.
///
/// Pairs are processed in the given order; the first claimant keeps the
/// plain sanitized name, later ones get a short hash of their key inserted
/// before the extension. Names are compared case-insensitively so packages
/// stay valid on case-insensitive file systems.
#[must_use]
pub fn assign_unique_names<'a, I>(entries: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut taken: HashSet<String> = HashSet::new();
    let mut assigned = BTreeMap::new();

    for (key, preferred) in entries {
        let base = sanitize_file_name(preferred);
        let mut candidate = base.clone();
        if taken.contains(&candidate.to_lowercase()) {
            let digest = sha256_hex(key.as_bytes());
            let (stem, ext) = split_extension(&base);
            candidate = format!("{stem}-{}{ext}", &digest[..8]);
            let mut n = 2;
            while taken.contains(&candidate.to_lowercase()) {
                candidate = format!("{stem}-{}-{n}{ext}", &digest[..8]);
                n += 1;
            }
        }
        taken.insert(candidate.to_lowercase());
        assigned.insert(key.to_string(), candidate);
    }
    assigned
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Replace every whole-URL occurrence of `url` in `text` with `replacement`.
///
/// An occurrence only counts when it is not immediately followed by further
/// URL characters, so rewriting `https://h/a` leaves `https://h/a.zip` alone.
#[must_use]
pub fn replace_url(text: &str, url: &str, replacement: &str) -> String {
    if url.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find(url) {
        let after = &rest[idx + url.len()..];
        out.push_str(&rest[..idx]);
        if ends_url(after) {
            out.push_str(replacement);
        } else {
            out.push_str(url);
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

fn ends_url(after: &str) -> bool {
    let mut chars = after.chars();
    match chars.next() {
        None => true,
        // Sentence punctuation ends a URL unless more URL text follows.
        Some('.' | ':' | ';' | '!' | '?') => chars.next().is_none_or(|c| !c.is_ascii_alphanumeric()),
        Some(c) => !(c.is_ascii_alphanumeric() || "-_~/#%&=+@$*".contains(c)),
    }
}
