//! Rowbridge structured error code registry.
//!
//! Every [`ConnectorError`](crate::error::ConnectorError) carries a stable
//! `RBR-NNNN` code that is:
//! - Present in the error message (grep-able in logs)
//! - Present in the source code (grep-able in code)
//! - Stable across versions (codes are never reused)
//!
//! # Code Ranges
//!
//! | Range | Category |
//! |-------|----------|
//! | `RBR-0xxx` | General / configuration |
//! | `RBR-4xxx` | Serialization / codecs |
//! | `RBR-5xxx` | Store access |
//! | `RBR-6xxx` | Scan checkpoint / recovery |

// ── General / Configuration (RBR-0xxx) ──

/// Invalid configuration value or combination.
pub const INVALID_CONFIG: &str = "RBR-0001";
/// Operation not valid in the component's current state.
pub const INVALID_STATE: &str = "RBR-0005";

// ── Serialization (RBR-4xxx) ──

/// Row or checkpoint encoding/decoding failed.
pub const CODEC_FAILURE: &str = "RBR-4001";

// ── Store access (RBR-5xxx) ──

/// Store unreachable or query failed after the retry budget was spent.
pub const SOURCE_UNAVAILABLE: &str = "RBR-5001";
/// Timeout or connection hiccup that is still within the retry budget.
pub const TRANSIENT_STORE: &str = "RBR-5002";

// ── Scan checkpoint / recovery (RBR-6xxx) ──

/// Restore column value decreased during a scan.
pub const MONOTONICITY_VIOLATION: &str = "RBR-6001";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let codes = [
            INVALID_CONFIG,
            INVALID_STATE,
            CODEC_FAILURE,
            SOURCE_UNAVAILABLE,
            TRANSIENT_STORE,
            MONOTONICITY_VIOLATION,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert!(codes.iter().all(|c| c.starts_with("RBR-")));
    }
}
