//! Error plumbing shared by the colloquy crates.
//!
//! Each crate defines its own error enums next to the code that raises them.
//! Errors travel as `rootcause::Report<E>` so that every layer can wrap the
//! report with its own context via `.context()` without losing the cause.

use rootcause::Report;

/// A `Result` whose error is a rootcause report carrying context `C`.
pub type Result<T, C> = std::result::Result<T, Report<C>>;
