// ============================================================================
// Domain Views
// ============================================================================

pub mod site;
