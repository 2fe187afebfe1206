//! In-process generator and embedder doubles

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::llm::{Embedder, EmbeddingVector, Generation, GenerationOptions, TextGenerator};

type Script<T> = Box<dyn Fn(&str) -> Result<T> + Send + Sync>;

/// Answers each prompt through a closure and records what it was asked
pub struct ScriptedGenerator {
    script: Script<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(script: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(Error::LLMError("scripted failure".to_string())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.script)(prompt).map(Generation::new)
    }
}

/// Embeds through a closure
pub struct ScriptedEmbedder {
    script: Script<Vec<f32>>,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new(script: impl Fn(&str) -> Result<Vec<f32>> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fixed(vector: Vec<f32>) -> Self {
        Self::new(move |_| Ok(vector.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(Error::EmbeddingFailed("scripted failure".to_string())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(text).map(EmbeddingVector::new)
    }
}

/// A well-formed summary response
pub fn summary_json(summary: &str, keywords: &[&str]) -> String {
    serde_json::json!({ "summary": summary, "keywords": keywords }).to_string()
}
