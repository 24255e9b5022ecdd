// src/generate.rs
//
// Contract for the text-generation collaborator that writes team analyses.
// Its wire protocol lives elsewhere; here it is just a fallible async
// string -> string call wrapped with retry and a cancellation token.

use crate::fetch::RetryPolicy;
use crate::schema::{Record, Value};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> impl Future<Output = anyhow::Result<String>> + Send;
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("text generation cancelled")]
    Cancelled,
    #[error("text generation failed: {0:#}")]
    Failed(anyhow::Error),
}

/// Call `generator` under `retry`, giving up as soon as `cancel` fires.
pub async fn generate_text<G: TextGenerator>(
    generator: &G,
    prompt: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<String, GenerateError> {
    if cancel.is_cancelled() {
        return Err(GenerateError::Cancelled);
    }
    let attempt = retry.run("generate", || generator.generate(prompt), |_| true);
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("generation cancelled");
            Err(GenerateError::Cancelled)
        }
        out = attempt => out.map_err(GenerateError::Failed),
    }
}

/// Plain-text prompt asking for a short analysis of one standings row.
pub fn analysis_prompt(team: &str, record: &Record) -> String {
    let mut prompt = format!(
        "Escribe un análisis breve (máximo 3 frases) del rendimiento de {} \
         en la liga a partir de estas estadísticas:\n",
        team
    );
    for (key, value) in record.iter() {
        let shown = match value {
            Value::Null => "sin datos".to_string(),
            other => other.to_string(),
        };
        prompt.push_str(&format!("- {}: {}\n", key, shown));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl TextGenerator for Flaky {
        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                anyhow::bail!("503 from model host");
            }
            Ok(format!("analysis of {} chars", prompt.len()))
        }
    }

    struct Hangs;

    impl TextGenerator for Hangs {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        }
    }

    fn quick_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let generator = Flaky {
            calls: AtomicU32::new(0),
            fail_first: 2,
        };
        let cancel = CancellationToken::new();
        let out = generate_text(&generator, "hola", &quick_retry(2), &cancel)
            .await
            .unwrap();
        assert_eq!(out, "analysis of 4 chars");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let generator = Flaky {
            calls: AtomicU32::new(0),
            fail_first: 5,
        };
        let cancel = CancellationToken::new();
        let err = generate_text(&generator, "hola", &quick_retry(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Failed(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let cancel = CancellationToken::new();
        let child = cancel.child_token();
        let task = tokio::spawn(async move {
            generate_text(&Hangs, "hola", &RetryPolicy::none(), &child).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let out = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("cancel should end the call")
            .unwrap();
        assert!(matches!(out, Err(GenerateError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = generate_text(&Hangs, "hola", &RetryPolicy::none(), &cancel).await;
        assert!(matches!(out, Err(GenerateError::Cancelled)));
    }

    #[test]
    fn test_analysis_prompt_lists_stats() {
        let record: Record = vec![
            ("equipo", Value::from("Boca")),
            ("pts", Value::Number(28.0)),
            ("dg", Value::Null),
        ]
        .into_iter()
        .collect();
        let prompt = analysis_prompt("Boca", &record);
        assert!(prompt.contains("rendimiento de Boca"));
        assert!(prompt.contains("- pts: 28\n"));
        assert!(prompt.contains("- dg: sin datos\n"));
    }
}
