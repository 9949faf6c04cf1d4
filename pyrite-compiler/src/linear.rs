// Linear-token tracking: per-path ownership states and the branch
// reconciliation rules for if/else and loops.

use std::collections::BTreeMap;

use pyrite_ast::Span;
use pyrite_diagnostics::{codes, Category, Diagnostic, Span as DiagSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Consumed,
}

/// State of one reachable sub-path, with the node that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct PathState {
    pub state: TokenState,
    pub span: Span,
}

/// Map from sub-path (tuple of field indices) to ownership state.
/// BTreeMap keeps diagnostics deterministic.
pub type LinearMap = BTreeMap<Vec<usize>, PathState>;

/// Fresh map for a newly created linear value: the whole value (empty
/// path) is active.
pub fn fresh(span: Span) -> LinearMap {
    let mut map = LinearMap::new();
    map.insert(
        vec![],
        PathState {
            state: TokenState::Active,
            span,
        },
    );
    map
}

/// Mark a path (and all sub-paths under it) consumed.
pub fn consume(map: &mut LinearMap, path: &[usize], span: Span) {
    for (key, value) in map.iter_mut() {
        if key.starts_with(path) || path.starts_with(key) {
            value.state = TokenState::Consumed;
            value.span = span;
        }
    }
}

/// Whether any path is still active.
pub fn any_active(map: &LinearMap) -> bool {
    map.values().any(|p| p.state == TokenState::Active)
}

pub fn active_paths(map: &LinearMap) -> Vec<Vec<usize>> {
    map.iter()
        .filter(|(_, p)| p.state == TokenState::Active)
        .map(|(k, _)| k.clone())
        .collect()
}

fn diag_span(span: &Span, file: &str) -> DiagSpan {
    DiagSpan::new(file.to_string(), span.line, span.column, span.length.max(1))
}

fn render_path(path: &[usize]) -> String {
    if path.is_empty() {
        "the value".to_string()
    } else {
        let parts: Vec<String> = path.iter().map(|i| format!(".{}", i)).collect();
        format!("path {}", parts.concat())
    }
}

/// Reconcile the two arms of an if statement, path by path. Each path must
/// end both arms in the same state; a missing entry on one side is
/// compatible with `Consumed` on the other (the token was introduced and
/// consumed inside that arm).
pub fn reconcile_branches(
    name: &str,
    then_states: &LinearMap,
    else_states: &LinearMap,
    file: &str,
    else_end: Span,
) -> Result<LinearMap, Diagnostic> {
    let mut merged = LinearMap::new();
    let mut paths: Vec<Vec<usize>> = then_states.keys().cloned().collect();
    for key in else_states.keys() {
        if !paths.contains(key) {
            paths.push(key.clone());
        }
    }

    for path in paths {
        let then_state = then_states.get(&path);
        let else_state = else_states.get(&path);
        match (then_state, else_state) {
            (Some(a), Some(b)) if a.state == b.state => {
                merged.insert(path, a.clone());
            }
            (Some(a), None) if a.state == TokenState::Consumed => {
                merged.insert(path, a.clone());
            }
            (None, Some(b)) if b.state == TokenState::Consumed => {
                merged.insert(path, b.clone());
            }
            (Some(a), Some(_b)) => {
                let consumed_in = if a.state == TokenState::Consumed {
                    "then"
                } else {
                    "else"
                };
                return Err(Diagnostic::error(
                    Category::Linear,
                    codes::LINEAR_INCONSISTENT_BRANCHES,
                    format!(
                        "linear token `{}` ({}) is consumed in the {} branch but not the other",
                        name,
                        render_path(&path),
                        consumed_in
                    ),
                    diag_span(&else_end, file),
                )
                .with_note(
                    "every control-flow path must consume a linear value exactly once"
                        .to_string(),
                ));
            }
            _ => {}
        }
    }

    Ok(merged)
}

/// Check an if statement without an else arm: no path may change from
/// active to consumed.
pub fn check_no_else_consumption(
    name: &str,
    before: &LinearMap,
    after: &LinearMap,
    file: &str,
    if_span: Span,
) -> Result<(), Diagnostic> {
    for (path, state_before) in before {
        if state_before.state != TokenState::Active {
            continue;
        }
        if let Some(state_after) = after.get(path) {
            if state_after.state == TokenState::Consumed {
                return Err(Diagnostic::error(
                    Category::Linear,
                    codes::LINEAR_INCONSISTENT_BRANCHES,
                    format!(
                        "linear token `{}` ({}) is consumed inside an `if` with no `else`",
                        name,
                        render_path(path)
                    ),
                    diag_span(&if_span, file),
                )
                .with_note(
                    "the fall-through path would leave the token active".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Check a loop body: tokens active at loop entry must still be active at
/// the back-edge, otherwise some iterations would consume them twice.
pub fn check_loop_body(
    name: &str,
    at_entry: &LinearMap,
    at_backedge: &LinearMap,
    file: &str,
    loop_span: Span,
) -> Result<(), Diagnostic> {
    for (path, entry_state) in at_entry {
        if entry_state.state != TokenState::Active {
            continue;
        }
        if let Some(back_state) = at_backedge.get(path) {
            if back_state.state == TokenState::Consumed {
                return Err(Diagnostic::error(
                    Category::Linear,
                    codes::LINEAR_CONSUMED_IN_LOOP,
                    format!(
                        "linear token `{}` ({}) is consumed inside a loop body",
                        name,
                        render_path(path)
                    ),
                    diag_span(&loop_span, file),
                )
                .with_note(
                    "a token consumed on one iteration would be consumed again on the next"
                        .to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Diagnostic for tokens still active at function exit.
pub fn tokens_not_consumed(name: &str, map: &LinearMap, file: &str) -> Option<Diagnostic> {
    let active = active_paths(map);
    if active.is_empty() {
        return None;
    }
    let span = map
        .get(&active[0])
        .map(|p| p.span)
        .unwrap_or_else(Span::unknown);
    let rendered: Vec<String> = active.iter().map(|p| render_path(p)).collect();
    Some(
        Diagnostic::error(
            Category::Linear,
            codes::LINEAR_NOT_CONSUMED,
            format!(
                "linear token `{}` not consumed at function exit ({})",
                name,
                rendered.join(", ")
            ),
            diag_span(&span, file),
        )
        .with_help(
            "assign the value to a binding, pass it to a function, or return it".to_string(),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_at(line: usize) -> PathState {
        PathState {
            state: TokenState::Active,
            span: Span::new(line, 1, 1),
        }
    }

    fn consumed_at(line: usize) -> PathState {
        PathState {
            state: TokenState::Consumed,
            span: Span::new(line, 1, 1),
        }
    }

    #[test]
    fn consume_cascades_to_subpaths() {
        let mut map = LinearMap::new();
        map.insert(vec![], active_at(1));
        map.insert(vec![0], active_at(1));
        map.insert(vec![0, 1], active_at(1));
        map.insert(vec![1], active_at(1));
        consume(&mut map, &[0], Span::new(2, 1, 1));
        assert_eq!(map[&vec![0]].state, TokenState::Consumed);
        assert_eq!(map[&vec![0, 1]].state, TokenState::Consumed);
        // the whole-value path covers path [0], so it is consumed too
        assert_eq!(map[&vec![]].state, TokenState::Consumed);
        assert_eq!(map[&vec![1]].state, TokenState::Active);
    }

    #[test]
    fn branches_consumed_on_both_sides_reconcile() {
        let mut then_states = LinearMap::new();
        then_states.insert(vec![], consumed_at(3));
        let mut else_states = LinearMap::new();
        else_states.insert(vec![], consumed_at(5));
        let merged = reconcile_branches(
            "t",
            &then_states,
            &else_states,
            "t.pyr",
            Span::new(6, 1, 1),
        )
        .expect("should reconcile");
        assert_eq!(merged[&vec![]].state, TokenState::Consumed);
    }

    #[test]
    fn branches_differing_states_error() {
        let mut then_states = LinearMap::new();
        then_states.insert(vec![], consumed_at(3));
        let mut else_states = LinearMap::new();
        else_states.insert(vec![], active_at(1));
        let err = reconcile_branches(
            "t",
            &then_states,
            &else_states,
            "t.pyr",
            Span::new(6, 1, 1),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::LINEAR_INCONSISTENT_BRANCHES);
        // diagnostic references the end of the else arm
        assert_eq!(err.span.line, 6);
    }

    #[test]
    fn if_without_else_may_not_consume() {
        let mut before = LinearMap::new();
        before.insert(vec![], active_at(1));
        let mut after = LinearMap::new();
        after.insert(vec![], consumed_at(2));
        assert!(
            check_no_else_consumption("t", &before, &after, "t.pyr", Span::new(2, 1, 1)).is_err()
        );
        // consuming nothing is fine
        assert!(
            check_no_else_consumption("t", &before, &before, "t.pyr", Span::new(2, 1, 1)).is_ok()
        );
    }

    #[test]
    fn loop_backedge_must_keep_tokens_active() {
        let mut entry = LinearMap::new();
        entry.insert(vec![], active_at(1));
        let mut backedge = LinearMap::new();
        backedge.insert(vec![], consumed_at(3));
        assert!(check_loop_body("t", &entry, &backedge, "t.pyr", Span::new(1, 1, 1)).is_err());
    }

    #[test]
    fn exit_diagnostic_lists_active_paths() {
        let mut map = LinearMap::new();
        map.insert(vec![], active_at(4));
        let diag = tokens_not_consumed("t", &map, "t.pyr").expect("should report");
        assert_eq!(diag.code, codes::LINEAR_NOT_CONSUMED);
        assert!(diag.message.contains("`t`"));
    }
}
