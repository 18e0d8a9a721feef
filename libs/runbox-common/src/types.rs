use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Languages with a worker runtime image.
///
/// Closed set: every per-language constant (file names, image tags, container
/// names) hangs off a variant, so adding a language is a compile-time change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Python, Language::Javascript, Language::Cpp];

    /// Identifier used on the wire and in image/container names
    pub fn id(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Cpp => "cpp",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::Javascript => "JavaScript",
            Language::Cpp => "C++",
        }
    }

    pub fn version_label(&self) -> &'static str {
        match self {
            Language::Python => "3.11",
            Language::Javascript => "Node.js 18",
            Language::Cpp => "GCC Latest",
        }
    }

    /// File the submitted source is written to, inside a worker or a scratch dir
    pub fn source_filename(&self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::Javascript => "main.js",
            Language::Cpp => "main.cpp",
        }
    }

    /// Registered name of the long-lived worker container
    pub fn worker_container_name(&self) -> String {
        format!("runbox-{}-worker", self.id())
    }

    pub fn default_worker_image(&self) -> String {
        format!("runbox-{}-worker:latest", self.id())
    }

    pub fn default_worker_dockerfile(&self) -> String {
        format!("Dockerfile.{}.worker", self.id())
    }

    pub fn default_ephemeral_dockerfile(&self) -> String {
        format!("Dockerfile.{}", self.id())
    }

    pub fn info(&self) -> LanguageInfo {
        LanguageInfo {
            id: *self,
            name: self.display_name().to_string(),
            version: self.version_label().to_string(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::Javascript),
            "cpp" => Ok(Language::Cpp),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

/// Display metadata for one supported language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub id: Language,
    pub name: String,
    pub version: String,
}

/// Static list of supported languages, in presentation order
pub fn supported_languages() -> Vec<LanguageInfo> {
    [Language::Python, Language::Cpp, Language::Javascript]
        .iter()
        .map(Language::info)
        .collect()
}

/// An execution request as received from a caller.
///
/// `language` stays a raw string here: turning it into a [`Language`] is the
/// coordinator's validation step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub input: String,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            input: input.into(),
        }
    }
}

pub const EXECUTION_TIME_FAILED: &str = "Failed";
pub const NO_OUTPUT: &str = "No output";

/// The one result shape surfaced to callers of either execution strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub error: bool,
    #[serde(rename = "executionTime")]
    pub execution_time: String,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            output: output.into(),
            error: false,
            execution_time: format_elapsed(elapsed),
        }
    }

    /// The program ran and failed (non-zero exit, compile error)
    pub fn program_error(output: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            output: output.into(),
            error: true,
            execution_time: format_elapsed(elapsed),
        }
    }

    /// Transport or infrastructure trouble; the job outcome is unknown
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: true,
            execution_time: EXECUTION_TIME_FAILED.to_string(),
        }
    }

    pub fn timed_out(output: impl Into<String>, limit: Duration) -> Self {
        Self {
            output: output.into(),
            error: true,
            execution_time: timeout_sentinel(limit),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.execution_time.starts_with("Timeout (>")
    }
}

/// `"Timeout (>Ns)"`
pub fn timeout_sentinel(limit: Duration) -> String {
    format!("Timeout (>{}s)", limit.as_secs())
}

pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{}ms", elapsed.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_round_trips_through_its_id() {
        for lang in Language::ALL {
            assert_eq!(lang.id().parse::<Language>(), Ok(lang));
        }
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        assert_eq!("ruby".parse::<Language>(), Err(UnknownLanguage("ruby".into())));
        assert!("".parse::<Language>().is_err());
        assert!("Python".parse::<Language>().is_err());
    }

    #[test]
    fn test_worker_names_are_per_language() {
        assert_eq!(Language::Cpp.worker_container_name(), "runbox-cpp-worker");
        assert_eq!(Language::Python.default_worker_image(), "runbox-python-worker:latest");
        assert_eq!(Language::Javascript.source_filename(), "main.js");
    }

    #[test]
    fn test_supported_languages_metadata() {
        let langs = supported_languages();
        assert_eq!(langs.len(), 3);
        let py = langs.iter().find(|l| l.id == Language::Python).unwrap();
        assert_eq!(py.name, "Python");
        assert_eq!(py.version, "3.11");
        let cpp = langs.iter().find(|l| l.id == Language::Cpp).unwrap();
        assert_eq!(cpp.version, "GCC Latest");
        let js = langs.iter().find(|l| l.id == Language::Javascript).unwrap();
        assert_eq!(js.version, "Node.js 18");
    }

    #[test]
    fn test_result_serializes_with_camel_case_time() {
        let result = ExecutionResult::failed("boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["executionTime"], "Failed");
        assert_eq!(json["error"], true);
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_timeout_sentinel_format() {
        let result = ExecutionResult::timed_out("slow", Duration::from_secs(30));
        assert_eq!(result.execution_time, "Timeout (>30s)");
        assert!(result.is_timeout());
        assert!(!ExecutionResult::failed("x").is_timeout());
    }

    #[test]
    fn test_request_input_defaults_to_empty() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"code":"print(1)","language":"python"}"#).unwrap();
        assert_eq!(req.input, "");
    }
}
