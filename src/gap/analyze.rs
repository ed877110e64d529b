//! 分析步骤：一次结构化调用，把请求判定为单一回答或可并行的多路探索

use serde::Deserialize;

use crate::gap::prompts::{analysis_prompt, GAP_SYSTEM};
use crate::gap::{GapContext, GapError};
use crate::llm::{CompletionRequest, LlmClient};
use crate::structured::parse_structured_as;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Analysis {
    Single,
    Parallel {
        #[serde(default)]
        tasks: Vec<String>,
        #[serde(default)]
        reasoning: String,
    },
}

impl Analysis {
    /// 去空白、去空任务、截断到上限；没有剩余任务时退化为 Single
    pub fn normalized(self, max_tasks: usize) -> Self {
        match self {
            Analysis::Single => Analysis::Single,
            Analysis::Parallel { tasks, reasoning } => {
                let tasks: Vec<String> = tasks
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .take(max_tasks.max(1))
                    .collect();
                if tasks.is_empty() {
                    Analysis::Single
                } else {
                    Analysis::Parallel { tasks, reasoning }
                }
            }
        }
    }
}

pub async fn analyze(
    llm: &dyn LlmClient,
    context: &GapContext,
    query: &str,
    focus: Option<&str>,
    max_tokens: u32,
) -> Result<Analysis, GapError> {
    let request = CompletionRequest::prompt(analysis_prompt(context, query, focus), max_tokens)
        .with_system(GAP_SYSTEM);
    let raw = llm.complete(request).await?;
    let analysis: Analysis = parse_structured_as(&raw)?;
    Ok(analysis)
}
