//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NEXUS__*` 覆盖（双下划线表示嵌套，如 `NEXUS__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::graph::LayoutConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub layout: LayoutConfig,
    pub gap: GapSection,
    pub socratic: SocraticSection,
    pub doctrine: DoctrineSection,
}

/// [app] 段：应用名、宇宙库目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 宇宙库根目录，未设置时用 ./universes
    pub data_dir: Option<PathBuf>,
}

impl AppSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("universes"))
    }
}

/// [llm] 段：后端选择、输出上限与超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / anthropic
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: ModelOverride,
    #[serde(default)]
    pub openai: ModelOverride,
    #[serde(default)]
    pub anthropic: ModelOverride,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelOverride {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [gap] 段：并行任务上限、合并节奏、单次输出上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GapSection {
    /// 规划阶段最多接受的并行子任务数，超出截断
    pub max_parallel_tasks: usize,
    /// 并行结果逐个合并之间的间隔（毫秒）
    pub merge_delay_ms: u64,
    pub max_tokens: u32,
}

impl Default for GapSection {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 5,
            merge_delay_ms: 150,
            max_tokens: 2048,
        }
    }
}

/// [socratic] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocraticSection {
    pub max_tokens: u32,
}

impl Default for SocraticSection {
    fn default() -> Self {
        Self { max_tokens: 512 }
    }
}

/// [doctrine] 段：阶段节奏、案例数量范围
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DoctrineSection {
    /// researching / finding-cases / building-map 等展示性阶段的停留时间（毫秒）
    pub checkpoint_delay_ms: u64,
    /// 逐个追加案例节点之间的间隔（毫秒）
    pub case_delay_ms: u64,
    /// error 状态自动回到 idle 前的等待（毫秒）
    pub error_reset_ms: u64,
    pub min_cases: usize,
    pub max_cases: usize,
    pub max_tokens: u32,
}

impl Default for DoctrineSection {
    fn default() -> Self {
        Self {
            checkpoint_delay_ms: 400,
            case_delay_ms: 150,
            error_reset_ms: 3000,
            min_cases: 5,
            max_cases: 8,
            max_tokens: 4096,
        }
    }
}

/// 从 config 目录加载配置，环境变量 NEXUS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NEXUS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NEXUS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
