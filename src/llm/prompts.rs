//! Built-in system prompts and the fixed user-facing strings shown around a
//! streamed explanation.

/// Preset for explaining a single content block.
pub const DEFAULT_PROMPT: &str = "通俗解释如下这经济学文字的含义，并摘出经济学名词并解释。内容中可能包含普通人不容易理解的因果关系，例如央行停止购买国债以稳定汇率，要找到这部分因果并适当解释其因果关系。**请使用纯文本回复，不要使用markdown格式**";

/// Preset for summarising many harvested blocks at once.
pub const SUMMARY_PROMPT: &str = "下面是从同一社群中连续收集的多条内容，条目之间以空行分隔。请先用三到五句话概括整体主题，再逐条列出其中的关键观点，最后摘出出现的经济学名词并给出通俗解释。";

/// Appended to every rendered update, never to the exported buffer.
pub const DISCLAIMER: &str = "\n\n---\n\n*内容由AI生成，可能存在错误，仅供参考*";

pub const LOADING_TEXT: &str = "正在加载...";

/// Prefix of the standalone error shown when nothing has streamed yet.
pub const FAILURE_PREFIX: &str = "获取内容失败，请重试: ";

pub const NOT_FOUND_TEXT: &str = "未找到有效内容，请在内容区域右键";

pub const CONTENT_NOT_READY_TEXT: &str = "内容未完全加载，请稍后再试";

/// Label shown when the selected model has no display name.
pub const DEFAULT_MODEL_LABEL: &str = "默认模型";

pub const SYNC_BUTTON_TEXT: &str = "👉 同步到笔记";

/// Whether a session explains one block or summarises a harvested batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMode {
    #[default]
    Explain,
    Summary,
}

impl PromptMode {
    pub fn builtin_prompt(self) -> &'static str {
        match self {
            PromptMode::Explain => DEFAULT_PROMPT,
            PromptMode::Summary => SUMMARY_PROMPT,
        }
    }
}

/// Markdown payload for one render update: the buffer plus the disclaimer.
pub fn render_markdown(buffer: &str) -> String {
    format!("{buffer}{DISCLAIMER}")
}

pub fn failure_message(error: &impl std::fmt::Display) -> String {
    format!("{FAILURE_PREFIX}{error}")
}
