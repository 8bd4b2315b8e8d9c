// =============================================================================
// Trading engines — one per venue, exits always evaluated before entries
// =============================================================================

pub mod crypto;
pub mod dex;
pub mod options;
pub mod stock;
