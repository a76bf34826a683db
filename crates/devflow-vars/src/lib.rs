//! Devflow Variables
//!
//! A flat, string-keyed property map with recursive `${name}` placeholder
//! expansion. Workflows carry one [`Variables`] scope; steps expand their
//! fields against it, pods feed captured `var NAME=VALUE` lines back into it,
//! and child workflows receive a [`VariableFilter`]ed view of it.
//!
//! Expansion never fails fast: every unresolved placeholder (and every
//! reference cycle) in a piece of text is collected into a single
//! [`ExpandError`], while resolvable placeholders are still substituted.

mod error;
mod filter;
mod glob;
mod variables;

pub use error::{ExpandError, VarsError};
pub use filter::VariableFilter;
pub use glob::Glob;
pub use variables::Variables;
