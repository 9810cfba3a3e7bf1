//! Fixed option lists presented to the user. Picking an entry is only a
//! local default until confirmed through `api/set_models` / `api/set_lanuage`.

pub const EMBEDDING_MODELS: &[&str] = &["OllamaEmbeddings", "OpenAIEmbeddings"];

pub const LLMS: &[&str] = &["gpt-3.5-turbo", "gpt-4", "DeepSeek-V3"];

pub const DOCUMENT_LANGUAGES: &[&str] = &["English", "Chinese"];

pub fn default_embedding_model() -> &'static str {
    EMBEDDING_MODELS[1]
}

pub fn default_llm() -> &'static str {
    LLMS[2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_the_lists() {
        assert!(EMBEDDING_MODELS.contains(&default_embedding_model()));
        assert!(LLMS.contains(&default_llm()));
    }
}
