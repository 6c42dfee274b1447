// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// The order lifecycle lives here. Storage is reached only through the
// traits in `crate::storage`.
//
// ============================================================================

pub mod order;
