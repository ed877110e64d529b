//! Prompt 构造：只约定输出契约，不追求措辞

use crate::gap::GapContext;

pub const GAP_SYSTEM: &str = "You are the reasoning engine of a spatial knowledge graph. \
You see the user's whole graph, including every node's full content and its parent/child edges, \
plus any activated memory universes. Ground every answer in that graph.";

pub fn analysis_prompt(context: &GapContext, query: &str, focus: Option<&str>) -> String {
    format!(
        r#"Graph context (JSON):
{context}

Focused entity: {focus}

User query: {query}

Decide whether this query is best answered by ONE answer, or by SEVERAL independent
explorations that can run in parallel (distinct angles that do not depend on each other).

Respond with JSON only:
{{"type": "single"}}
or
{{"type": "parallel", "tasks": ["exploration 1", "exploration 2"], "reasoning": "why these split cleanly"}}"#,
        context = context.render(),
        focus = focus.unwrap_or("(none, answer at the graph root)"),
    )
}

pub fn single_prompt(context: &GapContext, query: &str, focus: Option<&str>, quote: Option<&str>) -> String {
    let quote = quote
        .map(|q| format!("\nThe user is quoting: \"{q}\"\n"))
        .unwrap_or_default();
    format!(
        "Graph context (JSON):\n{}\n\nFocused entity: {}\n{}\nAnswer the user's query in markdown.\n\nUser query: {}",
        context.render(),
        focus.unwrap_or("(graph root)"),
        quote,
        query
    )
}

pub fn task_prompt(context_json: &str, query: &str, task: &str) -> String {
    format!(
        "Graph context (JSON):\n{context_json}\n\nThe user asked: {query}\n\n\
This is one of several parallel explorations. Explore only this angle, in markdown:\n\nTask: {task}"
    )
}

pub fn synthesis_prompt(context: &GapContext, query: &str) -> String {
    format!(
        r#"Activated memory universes (JSON):
{context}

User query: {query}

Synthesize across these universes. Respond with JSON only:
{{"title": "short title", "summary": "markdown overview", "insights": [{{"title": "insight title", "content": "markdown"}}]}}"#,
        context = context.render(),
    )
}
