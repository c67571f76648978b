//! Server settings read from the environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, bail};
use docqa_rag::RagConfig;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 5007;

/// An embedding backend that can appear in `DOCQA_EMBEDDING_PROVIDERS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Gemini,
    OpenAi,
    Hashing,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(EmbeddingBackend::Gemini),
            "openai" => Ok(EmbeddingBackend::OpenAi),
            "hashing" => Ok(EmbeddingBackend::Hashing),
            other => bail!("unknown embedding provider '{other}' (expected gemini, openai or hashing)"),
        }
    }
}

/// The backend answering generation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Gemini,
    OpenAi,
}

impl FromStr for LlmBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(LlmBackend::Gemini),
            "openai" => Ok(LlmBackend::OpenAi),
            other => bail!("unknown LLM provider '{other}' (expected gemini or openai)"),
        }
    }
}

/// Everything the server needs to start.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Holds the vector index under `index/` and uploads under `uploads/`.
    pub data_dir: PathBuf,
    /// Embedding providers in fallback order.
    pub embedding_providers: Vec<EmbeddingBackend>,
    pub llm_provider: LlmBackend,
    pub llm_model: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// SQLite URL of the response cache; in memory when unset.
    pub cache_database_url: Option<String>,
    /// Seconds between sweeps of expired cache entries.
    pub cache_purge_interval_secs: u64,
    pub rag: RagConfig,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("embedding_providers", &self.embedding_providers)
            .field("llm_provider", &self.llm_provider)
            .field("llm_model", &self.llm_model)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("cache_database_url", &self.cache_database_url)
            .field("cache_purge_interval_secs", &self.cache_purge_interval_secs)
            .field("rag", &self.rag)
            .finish()
    }
}

impl Settings {
    /// Read settings from the process environment, after loading `.env`.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which returns a variable's value.
    ///
    /// Without `DOCQA_EMBEDDING_PROVIDERS` the chain is every provider with
    /// an API key, then `hashing`. Without `DOCQA_LLM_PROVIDER` Gemini is
    /// preferred over OpenAI; one of the two keys must be present.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let gemini_api_key = var("GEMINI_API_KEY").or_else(|| var("GOOGLE_API_KEY"));
        let openai_api_key = var("OPENAI_API_KEY");

        let embedding_providers = match var("DOCQA_EMBEDDING_PROVIDERS") {
            Some(list) => list
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(str::parse)
                .collect::<anyhow::Result<Vec<EmbeddingBackend>>>()?,
            None => {
                let mut providers = Vec::new();
                if gemini_api_key.is_some() {
                    providers.push(EmbeddingBackend::Gemini);
                }
                if openai_api_key.is_some() {
                    providers.push(EmbeddingBackend::OpenAi);
                }
                providers.push(EmbeddingBackend::Hashing);
                providers
            }
        };
        if embedding_providers.is_empty() {
            bail!("DOCQA_EMBEDDING_PROVIDERS names no provider");
        }
        for backend in &embedding_providers {
            match backend {
                EmbeddingBackend::Gemini if gemini_api_key.is_none() => {
                    bail!("gemini embeddings need GEMINI_API_KEY or GOOGLE_API_KEY")
                }
                EmbeddingBackend::OpenAi if openai_api_key.is_none() => {
                    bail!("openai embeddings need OPENAI_API_KEY")
                }
                _ => {}
            }
        }

        let llm_provider = match var("DOCQA_LLM_PROVIDER") {
            Some(name) => name.parse()?,
            None if gemini_api_key.is_some() => LlmBackend::Gemini,
            None if openai_api_key.is_some() => LlmBackend::OpenAi,
            None => bail!("set GEMINI_API_KEY or OPENAI_API_KEY to choose an LLM provider"),
        };
        match llm_provider {
            LlmBackend::Gemini if gemini_api_key.is_none() => {
                bail!("the gemini LLM needs GEMINI_API_KEY or GOOGLE_API_KEY")
            }
            LlmBackend::OpenAi if openai_api_key.is_none() => {
                bail!("the openai LLM needs OPENAI_API_KEY")
            }
            _ => {}
        }

        let mut rag = RagConfig::default();
        override_with(&var, "DOCQA_CHUNK_SIZE", &mut rag.chunk_size)?;
        override_with(&var, "DOCQA_CHUNK_OVERLAP", &mut rag.chunk_overlap)?;
        override_with(&var, "DOCQA_TOP_K", &mut rag.top_k)?;
        override_with(&var, "DOCQA_SIMILARITY_THRESHOLD", &mut rag.similarity_threshold)?;
        override_with(&var, "DOCQA_MAX_PASSAGES", &mut rag.max_passages)?;
        override_with(&var, "DOCQA_CONTEXT_MAX_TOKENS", &mut rag.context_max_tokens)?;
        override_with(&var, "DOCQA_SUMMARY_THRESHOLD", &mut rag.summary_threshold)?;
        override_with(&var, "DOCQA_LLM_MAX_TOKENS", &mut rag.llm_max_tokens)?;
        override_with(&var, "DOCQA_LLM_MAX_ATTEMPTS", &mut rag.llm_max_attempts)?;
        override_with(&var, "DOCQA_CACHE_ENABLED", &mut rag.cache_enabled)?;
        override_with(&var, "DOCQA_CACHE_TTL_SECS", &mut rag.cache_ttl_secs)?;
        override_with(&var, "DOCQA_CACHE_WORKERS", &mut rag.cache_workers)?;
        override_with(&var, "DOCQA_EMBEDDING_DIMENSION", &mut rag.embedding_dimension)?;
        rag.validate()?;

        let mut port = DEFAULT_PORT;
        override_with(&var, "DOCQA_PORT", &mut port)?;
        let mut cache_purge_interval_secs = 3600;
        override_with(&var, "DOCQA_CACHE_PURGE_SECS", &mut cache_purge_interval_secs)?;

        Ok(Self {
            host: var("DOCQA_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            data_dir: var("DOCQA_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| "data".into()),
            embedding_providers,
            llm_provider,
            llm_model: var("DOCQA_LLM_MODEL"),
            gemini_api_key,
            openai_api_key,
            cache_database_url: var("DOCQA_CACHE_DATABASE_URL"),
            cache_purge_interval_secs,
            rag,
        })
    }

    /// The `host:port` the server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn override_with<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = var(name) {
        *target = raw.parse().with_context(|| format!("invalid {name}: '{raw}'"))?;
    }
    Ok(())
}
