//! # Primitives
//!
//! Fixed runtime limits and defaults for the TDS core.
//!
//! These are compiled into the binary and are immutable at runtime.
//! Every graph query and every caller-supplied string is bounded by one of them.

/// Maximum traversal depth for derived-from searches.
///
/// The derived-from query is "one or more hops"; this caps the hop count
/// so a cyclic or very deep provenance chain stays computationally bounded.
pub const MAX_TRAVERSAL_DEPTH: usize = 100;

/// Maximum number of nodes a single traversal may return.
pub const MAX_TRAVERSAL_RESULTS: usize = 10_000;

/// Default prefix for search-index collections (`{prefix}{label}`).
pub const DEFAULT_INDEX_PREFIX: &str = "tds_";

/// Default and maximum page sizes for project listings.
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for project names.
pub const MAX_NAME_LENGTH: usize = 256;

/// Maximum length for a raw asset resource id.
///
/// Opaque index identifiers (uuids, slugs) fit comfortably; anything longer
/// is rejected before it reaches a store.
pub const MAX_RESOURCE_ID_LENGTH: usize = 512;

/// Maximum number of ids in a single multi-id lookup.
pub const MAX_LOOKUP_IDS: usize = 10_000;
