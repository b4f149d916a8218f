// =============================================================================
// MinimalOS NextGen — Architecture Bindings
// =============================================================================
//
// Bare-metal implementations of the substrate traits. Only x86_64 is
// supported; hosted builds use `sim` instead.
// =============================================================================

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64::*;
