//! Deterministic file names for saved artifacts and diagnostics

use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Replace everything except ASCII alphanumerics, `.` and `-` with `_`
pub fn sanitize_lot(lot: &str) -> String {
    lot.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Extension of a suggested file name including the leading dot, or empty
pub fn extension_of(suggested: &str) -> String {
    Path::new(suggested)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// `<product>_<sanitizedLot><ext>`
pub fn artifact_file_name(product: &str, lot: &str, ext: &str) -> String {
    format!("{}_{}{}", product, sanitize_lot(lot), ext)
}

/// `failure-<product>-<sanitizedLot>.png`
pub fn screenshot_file_name(product: &str, lot: &str) -> String {
    format!("failure-{}-{}.png", product, sanitize_lot(lot))
}

/// Hands out names that are unique within one product run.
///
/// Lots that sanitize to the same string get `-2`, `-3`, ... appended to
/// the stem instead of overwriting the earlier file.
#[derive(Debug, Default)]
pub struct UniqueNamer {
    claimed: HashMap<String, usize>,
}

impl UniqueNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, name: &str) -> String {
        let count = self.claimed.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            return name.to_string();
        }

        let (stem, ext) = match name.rfind('.') {
            Some(pos) if pos > 0 => name.split_at(pos),
            _ => (name, ""),
        };
        let mut n = *count;
        loop {
            let candidate = format!("{}-{}{}", stem, n, ext);
            if !self.claimed.contains_key(&candidate) {
                warn!("File name collision on {}; saving as {}", name, candidate);
                self.claimed.insert(candidate.clone(), 1);
                return candidate;
            }
            n += 1;
        }
    }
}
