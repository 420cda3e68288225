//! Step environment normalization.

use std::collections::HashMap;

/// Prefix of the variables drover injects.
pub const CI_PREFIX: &str = "CI_";

/// Prefix older plugins still read.
pub const LEGACY_PREFIX: &str = "DRONE_";

/// Mirror every `CI_*` variable under the legacy prefix.
///
/// Variables the step already defines under the legacy name are left alone.
pub fn apply_legacy_env(environment: &mut HashMap<String, String>) {
    let mirrored: Vec<(String, String)> = environment
        .iter()
        .filter_map(|(key, value)| {
            let suffix = key.strip_prefix(CI_PREFIX)?;
            Some((format!("{LEGACY_PREFIX}{suffix}"), value.clone()))
        })
        .collect();

    for (key, value) in mirrored {
        environment.entry(key).or_insert(value);
    }
}
