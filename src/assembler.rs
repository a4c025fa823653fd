//! Incremental transcript assembly from part deltas.
//!
//! Text extends the matching text part, tool updates merge by call id, and
//! sub-agent deltas merge into the subtask part owned by their child session.
//! Every other part kind is appended as it arrives.

use std::collections::HashMap;

use agent_events::{
    CompactionPart, Part, PartDelta, PartDeltaKind, ReasoningPart, StepFinishPart,
    StepStartPart, SubtaskPart, SubtaskStatus, TextPart, ToolPart, ToolStatus,
};
use serde_json::Value;

/// Index of each child session's subtask part within a part sequence.
pub type ChildIndex = HashMap<String, usize>;

/// Applies one delta to `parts`. `now` stands in for missing timestamps.
/// Returns `false` when the delta changed nothing.
pub fn apply_delta(
    parts: &mut Vec<Part>,
    children: &mut ChildIndex,
    delta: &PartDelta,
    now: i64,
) -> bool {
    match &delta.kind {
        PartDeltaKind::Text {
            part_id,
            text,
            delta,
        } => apply_text(parts, part_id.as_deref(), text.as_deref(), delta.as_deref()),
        PartDeltaKind::Reasoning { part_id, text, delta } => {
            let Some(text) = delta.clone().or_else(|| text.clone()) else {
                return false;
            };
            parts.push(Part::Reasoning(ReasoningPart {
                id: part_id.clone(),
                text,
            }));
            true
        }
        PartDeltaKind::Tool { call_id, .. } => apply_tool(parts, call_id, &delta.kind, now),
        PartDeltaKind::Subtask {
            child_session_id, ..
        } => apply_subtask(parts, children, child_session_id, &delta.kind, now),
        PartDeltaKind::StepStart { part_id } => {
            parts.push(Part::StepStart(StepStartPart {
                id: part_id.clone(),
            }));
            true
        }
        PartDeltaKind::StepFinish {
            reason,
            tokens,
            cost,
        } => {
            parts.push(Part::StepFinish(StepFinishPart {
                reason: reason.clone(),
                tokens: *tokens,
                cost: *cost,
            }));
            true
        }
        PartDeltaKind::Compaction { auto } => {
            parts.push(Part::Compaction(CompactionPart { auto: *auto }));
            true
        }
    }
}

/// Rebuilds the child index for a part sequence, e.g. after rehydration.
#[must_use]
pub fn index_children(parts: &[Part]) -> ChildIndex {
    parts
        .iter()
        .enumerate()
        .filter_map(|(index, part)| match part {
            Part::Subtask(subtask) => Some((subtask.child_session_id.clone(), index)),
            _ => None,
        })
        .collect()
}

fn apply_text(
    parts: &mut Vec<Part>,
    part_id: Option<&str>,
    text: Option<&str>,
    delta: Option<&str>,
) -> bool {
    let target = match part_id {
        Some(id) => parts.iter().rposition(|part| {
            matches!(part, Part::Text(existing) if existing.id.as_deref() == Some(id))
        }),
        None => None,
    }
    .or_else(|| match parts.last() {
        Some(Part::Text(last)) if last.id.is_none() || part_id.is_none() => Some(parts.len() - 1),
        _ => None,
    });

    match target {
        Some(index) => {
            let Part::Text(existing) = &mut parts[index] else {
                return false;
            };
            match (delta, text) {
                (Some(delta), _) => existing.text.push_str(delta),
                (None, Some(text)) if existing.text != text => existing.text = text.to_string(),
                _ => return false,
            }
            if existing.id.is_none() {
                existing.id = part_id.map(str::to_string);
            }
            true
        }
        None => {
            let Some(initial) = text.or(delta) else {
                return false;
            };
            parts.push(Part::Text(TextPart {
                id: part_id.map(str::to_string),
                text: initial.to_string(),
            }));
            true
        }
    }
}

fn apply_tool(parts: &mut Vec<Part>, call_id: &str, kind: &PartDeltaKind, now: i64) -> bool {
    let PartDeltaKind::Tool {
        name,
        input,
        status,
        output,
        error,
        started_at,
        finished_at,
        ..
    } = kind
    else {
        return false;
    };

    let existing = parts
        .iter()
        .position(|part| matches!(part, Part::ToolUse(tool) if tool.call_id == call_id));

    let Some(index) = existing else {
        let status = status.unwrap_or(ToolStatus::Pending);
        parts.push(Part::ToolUse(ToolPart {
            call_id: call_id.to_string(),
            name: name.clone().unwrap_or_else(|| "unknown".to_string()),
            input: input.clone().unwrap_or(Value::Null),
            status,
            started_at: started_at.unwrap_or(now),
            finished_at: if status.is_terminal() {
                Some(finished_at.unwrap_or(now))
            } else {
                None
            },
            output: output.clone(),
            error: error.clone(),
        }));
        return true;
    };

    let Part::ToolUse(tool) = &mut parts[index] else {
        return false;
    };
    if tool.status.is_terminal() {
        return false;
    }

    let before = tool.clone();
    if let Some(name) = name {
        tool.name.clone_from(name);
    }
    if let Some(input) = input.as_ref().filter(|input| !input.is_null()) {
        tool.input = input.clone();
    }
    if let Some(started_at) = started_at {
        tool.started_at = *started_at;
    }
    if let Some(next) = status {
        tool.status = tool.status.advance(*next);
    }
    if output.is_some() {
        tool.output.clone_from(output);
    }
    if error.is_some() {
        tool.error.clone_from(error);
    }
    if tool.status.is_terminal() {
        tool.finished_at = Some(finished_at.unwrap_or(now));
    }

    *tool != before
}

fn apply_subtask(
    parts: &mut Vec<Part>,
    children: &mut ChildIndex,
    child_session_id: &str,
    kind: &PartDeltaKind,
    now: i64,
) -> bool {
    let PartDeltaKind::Subtask {
        description,
        agent,
        status,
        error,
        inner,
        ..
    } = kind
    else {
        return false;
    };

    let mapped = children
        .get(child_session_id)
        .copied()
        .filter(|index| match parts.get(*index) {
            Some(Part::Subtask(existing)) => existing.child_session_id == child_session_id,
            _ => false,
        });

    let index = match mapped {
        Some(index) => index,
        None => {
            parts.push(Part::Subtask(SubtaskPart {
                child_session_id: child_session_id.to_string(),
                description: None,
                agent: None,
                status: SubtaskStatus::Running,
                parts: Vec::new(),
                started_at: now,
                finished_at: None,
                error: None,
            }));
            let index = parts.len() - 1;
            children.insert(child_session_id.to_string(), index);
            index
        }
    };
    let created = mapped.is_none();

    let Part::Subtask(subtask) = &mut parts[index] else {
        return created;
    };
    let mut changed = created;

    if let Some(description) = description {
        if subtask.description.as_ref() != Some(description) {
            subtask.description = Some(description.clone());
            changed = true;
        }
    }
    if let Some(agent) = agent {
        if subtask.agent.as_ref() != Some(agent) {
            subtask.agent = Some(agent.clone());
            changed = true;
        }
    }
    if let Some(inner) = inner {
        let mut nested = index_children(&subtask.parts);
        changed |= apply_delta(&mut subtask.parts, &mut nested, inner, now);
    }
    if let Some(next) = status {
        let advanced = subtask.status.advance(*next);
        if advanced != subtask.status {
            subtask.status = advanced;
            if advanced.is_terminal() {
                subtask.finished_at = Some(now);
            }
            if advanced == SubtaskStatus::Error {
                subtask.error.clone_from(error);
            }
            changed = true;
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use agent_events::{
        Part, PartDelta, PartDeltaKind, SubtaskStatus, TokenUsage, ToolStatus,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{apply_delta, index_children, ChildIndex};

    fn text(part_id: Option<&str>, full: Option<&str>, delta: Option<&str>) -> PartDelta {
        PartDelta::new(
            Some("msg_1".to_string()),
            PartDeltaKind::Text {
                part_id: part_id.map(str::to_string),
                text: full.map(str::to_string),
                delta: delta.map(str::to_string),
            },
        )
    }

    fn tool(call_id: &str, status: ToolStatus, output: Option<&str>) -> PartDelta {
        PartDelta::new(
            None,
            PartDeltaKind::Tool {
                call_id: call_id.to_string(),
                name: Some("bash".to_string()),
                input: Some(json!({ "command": "ls" })),
                status: Some(status),
                output: output.map(str::to_string),
                error: None,
                started_at: None,
                finished_at: None,
            },
        )
    }

    fn apply_all(deltas: &[PartDelta]) -> (Vec<Part>, ChildIndex) {
        let mut parts = Vec::new();
        let mut children = ChildIndex::new();
        for delta in deltas {
            apply_delta(&mut parts, &mut children, delta, 1_000);
        }
        (parts, children)
    }

    #[test]
    fn streamed_text_extends_one_part() {
        let (parts, _) = apply_all(&[
            text(Some("p1"), Some("Hel"), Some("Hel")),
            text(Some("p1"), Some("Hello"), Some("lo")),
        ]);

        assert_eq!(parts.len(), 1);
        let Part::Text(part) = &parts[0] else {
            panic!("expected text part");
        };
        assert_eq!(part.text, "Hello");
    }

    #[test]
    fn snapshot_without_increment_replaces_text() {
        let (parts, _) = apply_all(&[
            text(Some("p1"), Some("draft"), None),
            text(Some("p1"), Some("draft, revised"), None),
        ]);

        assert_eq!(parts.len(), 1);
        let Part::Text(part) = &parts[0] else {
            panic!("expected text part");
        };
        assert_eq!(part.text, "draft, revised");
    }

    #[test]
    fn new_text_part_id_after_other_parts_appends() {
        let (parts, _) = apply_all(&[
            text(Some("p1"), None, Some("before")),
            tool("call_1", ToolStatus::Running, None),
            text(Some("p2"), None, Some("after")),
        ]);

        let kinds: Vec<&str> = parts.iter().map(Part::kind).collect();
        assert_eq!(kinds, vec!["text", "tool_use", "text"]);
    }

    #[test]
    fn tool_lifecycle_merges_into_single_terminal_part() {
        let (parts, _) = apply_all(&[
            tool("call_1", ToolStatus::Pending, None),
            tool("call_1", ToolStatus::Running, None),
            tool("call_1", ToolStatus::Success, Some("Cargo.toml")),
        ]);

        assert_eq!(parts.len(), 1);
        let Part::ToolUse(part) = &parts[0] else {
            panic!("expected tool part");
        };
        assert_eq!(part.status, ToolStatus::Success);
        assert_eq!(part.output.as_deref(), Some("Cargo.toml"));
        assert_eq!(part.finished_at, Some(1_000));
    }

    #[test]
    fn tool_status_never_moves_backwards() {
        let (parts, _) = apply_all(&[
            tool("call_1", ToolStatus::Error, None),
            tool("call_1", ToolStatus::Running, Some("late output")),
        ]);

        let Part::ToolUse(part) = &parts[0] else {
            panic!("expected tool part");
        };
        assert_eq!(part.status, ToolStatus::Error);
        assert_eq!(part.output, None);
    }

    #[test]
    fn tool_missing_timestamps_default_to_now() {
        let (parts, _) = apply_all(&[tool("call_1", ToolStatus::Running, None)]);

        let Part::ToolUse(part) = &parts[0] else {
            panic!("expected tool part");
        };
        assert_eq!(part.started_at, 1_000);
        assert_eq!(part.finished_at, None);
    }

    #[test]
    fn child_deltas_nest_inside_one_subtask_part() {
        let (parts, children) = apply_all(&[
            text(None, None, Some("Delegating. ")),
            PartDelta::child_status("ses_child", SubtaskStatus::Running, None),
            PartDelta::for_child("ses_child", tool("call_9", ToolStatus::Running, None)),
            PartDelta::for_child("ses_child", tool("call_9", ToolStatus::Success, Some("ok"))),
            PartDelta::for_child("ses_child", text(None, None, Some("done"))),
            PartDelta::child_status("ses_child", SubtaskStatus::Completed, None),
        ]);

        assert_eq!(parts.len(), 2);
        assert_eq!(children.get("ses_child"), Some(&1));
        let Part::Subtask(subtask) = &parts[1] else {
            panic!("expected subtask part");
        };
        assert_eq!(subtask.status, SubtaskStatus::Completed);
        let nested: Vec<&str> = subtask.parts.iter().map(Part::kind).collect();
        assert_eq!(nested, vec!["tool_use", "text"]);
        assert!(!parts[1].is_active());
    }

    #[test]
    fn grandchild_deltas_recurse_through_nested_subtasks() {
        let grandchild =
            PartDelta::for_child("ses_grandchild", tool("call_1", ToolStatus::Running, None));
        let (parts, _) = apply_all(&[
            PartDelta::for_child("ses_child", grandchild.clone()),
            PartDelta::for_child("ses_child", grandchild),
        ]);

        let Part::Subtask(child) = &parts[0] else {
            panic!("expected subtask part");
        };
        assert_eq!(child.parts.len(), 1);
        let Part::Subtask(nested) = &child.parts[0] else {
            panic!("expected nested subtask part");
        };
        assert_eq!(nested.parts.len(), 1);
        assert!(parts[0].is_active());
    }

    #[test]
    fn subtask_error_records_message_and_stays_terminal() {
        let (parts, _) = apply_all(&[
            PartDelta::child_status("ses_child", SubtaskStatus::Error, Some("boom".to_string())),
            PartDelta::child_status("ses_child", SubtaskStatus::Running, None),
        ]);

        let Part::Subtask(subtask) = &parts[0] else {
            panic!("expected subtask part");
        };
        assert_eq!(subtask.status, SubtaskStatus::Error);
        assert_eq!(subtask.error.as_deref(), Some("boom"));
    }

    #[test]
    fn markers_always_append() {
        let finish = PartDelta::new(
            None,
            PartDeltaKind::StepFinish {
                reason: Some("stop".to_string()),
                tokens: TokenUsage::default(),
                cost: 0.0,
            },
        );
        let start = PartDelta::new(None, PartDeltaKind::StepStart { part_id: None });
        let compaction = PartDelta::new(None, PartDeltaKind::Compaction { auto: true });
        let reasoning = PartDelta::new(
            None,
            PartDeltaKind::Reasoning {
                part_id: None,
                text: Some("think".to_string()),
                delta: None,
            },
        );

        let (parts, _) = apply_all(&[
            start.clone(),
            reasoning.clone(),
            reasoning,
            finish.clone(),
            start,
            finish,
            compaction,
        ]);

        assert_eq!(parts.len(), 7);
    }

    #[test]
    fn index_children_maps_top_level_subtasks() {
        let (parts, children) = apply_all(&[
            text(None, None, Some("a")),
            PartDelta::child_status("ses_a", SubtaskStatus::Running, None),
            PartDelta::child_status("ses_b", SubtaskStatus::Running, None),
        ]);

        assert_eq!(index_children(&parts), children);
    }
}
