//! Task renderings
//!
//! Plain formatting helpers that project tasks into markdown for
//! observation prompts and output aggregation. Tree variants demote child
//! headings one level so nested documents stay readable.

use crate::task::{Task, TaskId, TaskTree};

/// Requirement description: title, type, tags, protocol and input.
pub fn requirement_view(task: &Task) -> String {
    let mut tags: Vec<&str> = task.tags().iter().map(String::as_str).collect();
    tags.sort_unstable();
    format!(
        "# Task: {title}\n- type: {task_type}\n- tags: {tags}\n- completed: {completed}\n\n## Protocol\n{protocol}\n\n## Input\n{input}",
        title = task.title(),
        task_type = task.task_type(),
        tags = tags.join(", "),
        completed = task.is_completed(),
        protocol = task.protocol(),
        input = task.input(),
    )
}

/// Document rendering: title heading plus output body.
pub fn document_view(task: &Task) -> String {
    format!("# {}\n{}", task.title(), task.output().unwrap_or(""))
}

/// Todo-list line for one task.
pub fn todo_view(task: &Task) -> String {
    let mark = if task.is_completed() { "x" } else { " " };
    format!("- [{mark}] {}", task.title())
}

/// Document rendering of a subtree. `recursion_limit` of 0 renders only the
/// node itself; each level of children is demoted one heading level.
pub fn document_tree_view(tree: &TaskTree, id: TaskId, recursion_limit: i32) -> String {
    let mut out = document_view(tree.task(id));
    if recursion_limit == 0 {
        return out;
    }
    let next_limit = if recursion_limit > 0 { recursion_limit - 1 } else { -1 };
    for child in tree.children(id) {
        let view = document_tree_view(tree, *child, next_limit);
        out.push_str("\n\n");
        out.push_str(&demote_headings(&view));
    }
    out
}

/// Todo-list rendering of a subtree with indented children.
pub fn todo_tree_view(tree: &TaskTree, id: TaskId) -> String {
    let mut out = todo_view(tree.task(id));
    for child in tree.children(id) {
        for line in todo_tree_view(tree, *child).lines() {
            out.push_str("\n\t");
            out.push_str(line);
        }
    }
    out
}

/// Add one `#` to every markdown heading.
fn demote_headings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (index, line) in text.lines().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let hashes = line.chars().take_while(|c| *c == '#').count();
        if hashes > 0 && line[hashes..].starts_with(' ') {
            out.push('#');
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titled(title: &str, output: Option<&str>) -> Task {
        let mut task = Task::new("qa", "answer in plain text").with_title(title);
        if let Some(output) = output {
            task.set_completed(output);
        }
        task
    }

    #[test]
    fn test_requirement_view_lists_protocol_and_input() {
        let task = Task::new("qa", "answer in plain text")
            .with_title("question")
            .with_input("What is 2+2?")
            .with_tags(["math".to_string()]);
        let view = requirement_view(&task);
        assert!(view.contains("# Task: question"));
        assert!(view.contains("- tags: math"));
        assert!(view.contains("## Protocol\nanswer in plain text"));
        assert!(view.contains("## Input\nWhat is 2+2?"));
    }

    #[test]
    fn test_todo_view_marks_completion() {
        assert_eq!(todo_view(&titled("open", None)), "- [ ] open");
        assert_eq!(todo_view(&titled("done", Some("out"))), "- [x] done");
    }

    #[test]
    fn test_document_tree_view_demotes_child_headings() {
        let mut tree = TaskTree::new();
        let root = tree.insert(titled("report", Some("summary")));
        tree.add_sub_task(root, titled("part one", Some("alpha"))).expect("child");
        tree.add_sub_task(root, titled("part two", Some("beta"))).expect("child");

        let view = document_tree_view(&tree, root, -1);
        assert!(view.starts_with("# report\nsummary"));
        assert!(view.contains("## part one\nalpha"));
        assert!(view.contains("## part two\nbeta"));
    }

    #[test]
    fn test_document_tree_view_honors_recursion_limit() {
        let mut tree = TaskTree::new();
        let root = tree.insert(titled("report", Some("summary")));
        let child = tree.add_sub_task(root, titled("part", Some("alpha"))).expect("child");
        tree.add_sub_task(child, titled("detail", Some("deep"))).expect("grandchild");

        let shallow = document_tree_view(&tree, root, 1);
        assert!(shallow.contains("## part"));
        assert!(!shallow.contains("detail"));
    }

    #[test]
    fn test_todo_tree_view_indents_children() {
        let mut tree = TaskTree::new();
        let root = tree.insert(titled("root", None));
        tree.add_sub_task(root, titled("child", Some("out"))).expect("child");
        assert_eq!(todo_tree_view(&tree, root), "- [ ] root\n\t- [x] child");
    }
}
