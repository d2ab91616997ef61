//! Built-in reference tools.
//!
//! Concrete tool implementations are deliberately thin here — real
//! deployments register their own. The calculator doubles as the canonical
//! example of the [`Tool`](crate::tool::Tool) contract.

pub mod calculator;

pub use calculator::CalculatorTool;
