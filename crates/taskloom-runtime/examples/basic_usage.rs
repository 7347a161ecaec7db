//! Basic usage example for taskloom
//!
//! This example demonstrates:
//! - Building a ReAct executor agent over a scripted LLM
//! - Registering a tool the LLM can call
//! - Driving a task tree to completion with the default scheduler
//! - Consuming the out queue while the run progresses

use std::sync::Arc;

use serde_json::{json, Value};

use taskloom_agent::agent::Agent;
use taskloom_agent::llm::MockLlm;
use taskloom_agent::react::react_workflow;
use taskloom_agent::tool::StaticToolService;
use taskloom_core::completion::{CompletionConfig, Tool};
use taskloom_core::context::RunContext;
use taskloom_core::message::{Message, Role, ToolCallRequest};
use taskloom_core::queue::Queue;
use taskloom_core::task::{Task, TaskTree};
use taskloom_runtime::{build_tree_scheduler, TaskRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== taskloom basic usage ===\n");

    // A tool the LLM may call.
    let tools = StaticToolService::new().with_tool(
        Tool::new("search", "Look a query up in the knowledge base"),
        Arc::new(|args: &Value| {
            let query = args.get("query").and_then(Value::as_str).unwrap_or("");
            Ok(format!("two articles match `{query}`"))
        }),
    );

    // A scripted LLM standing in for a real provider adapter: one tool
    // round, then the final answer.
    let llm = MockLlm::with_replies([
        Message::new(Role::Assistant, vec![]).with_tool_calls(vec![ToolCallRequest::new(
            "call-1",
            "search",
            json!({"query": "rust agents"}),
        )]),
        Message::assistant("Both articles agree: state machines keep agents honest."),
    ]);

    let workflow = react_workflow(
        "Answer the task input, using tools where they help.",
        None,
        CompletionConfig::new("scripted"),
        6,
    )?;
    let executor = Arc::new(
        Agent::new("worker", "react", workflow)
            .with_default_llm(Arc::new(llm))
            .with_tool_service(Arc::new(tools)),
    );

    let registry = Arc::new(TaskRegistry::new().with_type(
        "qa",
        Arc::new(|| Task::new("qa", "plain text in, plain text out")),
    ));
    let scheduler = build_tree_scheduler(executor, None, registry, 2)?;

    let mut tree = TaskTree::new();
    let root = tree.insert(
        Task::new("qa", "plain text in, plain text out")
            .with_title("summarize")
            .with_input("What do the articles say about agents?"),
    );

    let queue: Arc<Queue<Message>> = Arc::new(Queue::default());
    let observer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            while let Some(message) = queue.get().await {
                println!("[{:?}] {}", message.role, message.text());
            }
        })
    };

    scheduler
        .run(&RunContext::new("demo-user"), &queue, &mut tree, root)
        .await?;
    observer.await?;

    println!("\nfinal state: {:?}", tree.task(root).state());
    println!("output: {}", tree.task(root).output().unwrap_or("<none>"));
    Ok(())
}
