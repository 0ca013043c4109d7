// ABOUTME: Configuration helpers shared by Sandpit packages
// ABOUTME: Exposes environment variable names and a first-match lookup over legacy aliases

pub mod constants;

use tracing::debug;

/// Read the first non-empty value among `names`, in order.
///
/// Later names are legacy aliases; a hit on one of them is logged so stale
/// deployments can be spotted.
pub fn first_var(names: &[&str]) -> Option<String> {
    for (index, name) in names.iter().enumerate() {
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => {
                if index > 0 {
                    debug!("Using legacy environment variable {}", name);
                }
                return Some(value.trim().to_string());
            }
            _ => continue,
        }
    }
    None
}

/// Read a single environment variable, treating blank values as unset.
pub fn var(name: &str) -> Option<String> {
    first_var(&[name])
}
