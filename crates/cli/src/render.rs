//! List rendering.

use std::collections::{BTreeMap, HashSet};

use clap::ValueEnum;
use yaks_core::{Task, TaskState};

use crate::style;

pub const EMPTY_MESSAGE: &str = "You have no yaks. Are you done?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Checklist, nested by two spaces per level.
    #[default]
    #[value(alias = "md")]
    Markdown,
    /// One full name per line.
    #[value(alias = "raw")]
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Only {
    NotDone,
    Done,
}

impl Only {
    fn admits(self, task: &Task) -> bool {
        match self {
            Only::NotDone => task.state != TaskState::Done,
            Only::Done => task.state == TaskState::Done,
        }
    }
}

/// Render the whole tree. `styled` dims done tasks in markdown output.
pub fn render(tasks: &[Task], format: Format, only: Option<Only>, styled: bool) -> String {
    if tasks.is_empty() {
        return match format {
            Format::Markdown => EMPTY_MESSAGE.to_string(),
            Format::Plain => String::new(),
        };
    }

    let shown: Vec<&Task> = tasks
        .iter()
        .filter(|t| only.map_or(true, |o| o.admits(t)))
        .collect();
    let names: HashSet<&str> = shown.iter().map(|t| t.name.as_str()).collect();

    // A task whose parent is filtered out hangs off the root.
    let mut children: BTreeMap<Option<&str>, Vec<&Task>> = BTreeMap::new();
    for task in shown.iter().copied() {
        let parent = task.parent().filter(|p| names.contains(p));
        children.entry(parent).or_default().push(task);
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| {
            b.is_done()
                .cmp(&a.is_done())
                .then(a.mtime.cmp(&b.mtime))
                .then(a.name.cmp(&b.name))
        });
    }

    let mut lines = Vec::new();
    let mut stack: Vec<(&Task, usize)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|t| (*t, 0)).collect())
        .unwrap_or_default();
    while let Some((task, depth)) = stack.pop() {
        lines.push(line(task, depth, format, styled));
        if let Some(kids) = children.get(&Some(task.name.as_str())) {
            stack.extend(kids.iter().rev().map(|t| (*t, depth + 1)));
        }
    }
    lines.join("\n")
}

fn line(task: &Task, depth: usize, format: Format, styled: bool) -> String {
    match format {
        Format::Plain => task.name.clone(),
        Format::Markdown => {
            // Orphaned roots keep their full name so the path stays visible.
            let label = if depth == 0 {
                task.name.as_str()
            } else {
                task.basename()
            };
            let indent = "  ".repeat(depth);
            if task.is_done() {
                let text = format!("{}- [x] {}", indent, label);
                if styled {
                    style::dim(&text)
                } else {
                    text
                }
            } else {
                format!("{}- [ ] {}", indent, label)
            }
        }
    }
}

/// `name`, then a blank line and the context when there is one.
pub fn with_context(task: &Task) -> String {
    if task.context.is_empty() {
        task.name.clone()
    } else {
        format!("{}\n\n{}", task.name, task.context)
    }
}
