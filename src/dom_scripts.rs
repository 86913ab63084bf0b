//! Page-context scripts used by the browser runtime.
//!
//! The scripts live in their own `.js` files so editors highlight them, and
//! are bundled as strings at compile time.

/// Expression evaluating to a serialised [`DomSnapshot`](crate::dom_snapshot::DomSnapshot).
pub const CONTENT_SNAPSHOT_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/content_snapshot.js"
));

/// Function expression taking a node index (or `null`) and moving the
/// highlight there.
pub const HIGHLIGHT_SCRIPT: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts/highlight.js"));

/// Expression that highlights node `index`, or clears highlights for `None`.
pub fn highlight_expression(index: Option<usize>) -> String {
    let argument = index.map_or_else(|| "null".to_string(), |value| value.to_string());
    format!("{}({argument})", HIGHLIGHT_SCRIPT.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_script_stamps_node_indexes() {
        assert!(CONTENT_SNAPSHOT_SCRIPT.contains("data-zsxq-node"));
        assert!(CONTENT_SNAPSHOT_SCRIPT.contains("scrollY"));
    }

    #[test]
    fn highlight_expression_invokes_the_function() {
        let expr = highlight_expression(Some(12));
        assert!(expr.ends_with("})(12)"));
        assert!(highlight_expression(None).ends_with("(null)"));
    }
}
