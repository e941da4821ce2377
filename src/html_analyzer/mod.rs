//! HTML Analyzer — pure, synchronous document inspection. No network or
//! browser I/O happens here; every operation takes an HTML string (or, for
//! [`inspect_challenge_url`], a bare URL) already captured by the Fetcher or
//! Browser Driver.

mod challenge;
mod simplify;
mod snippets;
mod xpath;

pub use challenge::{detect_challenge_markers, inspect_challenge_url};
pub use simplify::simplify_dom;
pub use snippets::extract_snippets;
pub use xpath::{evaluate_xpath, evaluate_xpath_full};
