pub const SOCRATIC_SYSTEM: &str = "You are a Socratic tutor exploring how two ideas connect. \
Ask exactly one short, open-ended question at a time. Never answer your own question. \
Build on the learner's previous answers. Reply with the question only.";

pub fn opening_prompt(a: (&str, &str), b: (&str, &str), seed: Option<&str>) -> String {
    let seed = seed
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("\nThe learner adds this context: {s}\n"))
        .unwrap_or_default();
    format!(
        "Idea A: {}\n{}\n\nIdea B: {}\n{}\n{}\nAsk the opening question that makes the learner think about how A and B relate.",
        a.0, a.1, b.0, b.1, seed
    )
}
