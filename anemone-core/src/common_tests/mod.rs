//! Common tests for `LinkedQueue` under any `Guard` implementation.
//!
//! Downstream guard crates re-run these against their own reclamation
//! strategy (see `anemone-crossbeam`).
