use crate::config::{Config, ModelId};
use crate::git::{CommandSpec, ProcessInvoker};
use crate::llm::client::{AiBackend, AiResponse, LLMError};
use crate::security::Arg;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Drives a prompt-mode AI CLI through the process invoker
///
/// The invoker must carry a [`crate::security::BinaryProfile::ai_cli`]
/// profile for `binary`, otherwise every call is rejected.
#[derive(Debug, Clone)]
pub struct CliBackend {
    invoker: ProcessInvoker,
    binary: String,
    model: ModelId,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CliBackend {
    pub fn new<P: AsRef<Path>>(
        invoker: ProcessInvoker,
        binary: impl Into<String>,
        model: ModelId,
        working_dir: P,
    ) -> Self {
        Self {
            invoker,
            binary: binary.into(),
            model,
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config<P: AsRef<Path>>(config: &Config, invoker: ProcessInvoker, working_dir: P) -> Self {
        Self::new(invoker, config.ai.binary.clone(), config.ai.model, working_dir)
            .with_timeout(config.ai_timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `<binary> -p <prompt> --output-format json --model <id>`
    pub fn command(&self, prompt: &str) -> CommandSpec {
        CommandSpec::new(
            self.binary.clone(),
            None,
            vec![
                Arg::flag("-p"),
                Arg::prompt(prompt),
                Arg::flag("--output-format"),
                Arg::value("json"),
                Arg::flag("--model"),
                Arg::value(self.model.as_str()),
            ],
            &self.working_dir,
        )
        .with_timeout(self.timeout)
    }
}

#[async_trait]
impl AiBackend for CliBackend {
    async fn complete(&self, prompt: &str) -> Result<AiResponse, LLMError> {
        let spec = self.command(prompt);
        let output = self.invoker.run(&spec).await?;
        Ok(AiResponse::ok(output.stdout))
    }
}
