use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder replaced with the conversation id in the system prompt.
pub const CONVERSATION_PLACEHOLDER: &str = "{{CONVERSATION}}";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    pub fn dashboard_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://chat_history.db".to_string(),
            pool_max_size: 5,
            pool_timeout_seconds: 30,
        }
    }
}

/// OpenAI-compatible backend endpoint and generation parameters
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key: String::new(),
            model: "deepseek-v3".to_string(),
            timeout_seconds: 120,
            max_tokens: 5000,
            temperature: 0.8,
            top_p: 0.8,
            presence_penalty: 1.1,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub bridge_url: String,
    /// Conversations (display names) to register listeners for
    pub listen_list: Vec<String>,
    pub sentinel: String,
    pub request_timeout_seconds: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:5100".to_string(),
            listen_list: Vec::new(),
            sentinel: "new messages follow".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    /// Max turns kept per conversation
    pub window_size: usize,
    /// Turns sent to the backend with each prompt
    pub prompt_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            prompt_turns: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    pub system_prompt_template: String,
    pub fallback_reply: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_prompt_template: format!("You are {}'s assistant.", CONVERSATION_PLACEHOLDER),
            fallback_reply: "service temporarily unavailable".to_string(),
        }
    }
}

impl PromptsConfig {
    pub fn system_prompt_for(&self, conversation_id: &str) -> String {
        self.system_prompt_template
            .replace(CONVERSATION_PLACEHOLDER, conversation_id)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_connect_attempts: u32,
    pub retry_delay_seconds: u64,
    pub cool_down_seconds: u64,
    pub recovery_pause_seconds: u64,
    pub poll_interval_millis: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: 3,
            retry_delay_seconds: 5,
            cool_down_seconds: 300,
            recovery_pause_seconds: 10,
            poll_interval_millis: 1000,
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub auto_open: bool,
    pub open_delay_seconds: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            auto_open: true,
            open_delay_seconds: 2,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Load .env file if exists
        dotenvy::dotenv().ok();

        Self::from_environment(Self::environment())
    }

    /// APP_ prefix, `__` between nested keys.
    /// Example: APP_LLM__API_KEY=sk-..., APP_CHAT__LISTEN_LIST=alice,bob
    fn environment() -> Environment {
        Environment::with_prefix("APP")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("chat.listen_list")
            .try_parsing(true)
    }

    fn from_environment(environment: Environment) -> Result<Self> {
        let config = Config::builder()
            // Optional; environment overrides it
            .add_source(File::with_name("config/settings").required(false))
            .add_source(environment)
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.trim().is_empty() {
            anyhow::bail!("llm.api_key is not set (APP_LLM__API_KEY)");
        }

        if self.chat.listen_list.iter().all(|who| who.trim().is_empty()) {
            anyhow::bail!("chat.listen_list must name at least one conversation");
        }

        if self.context.window_size == 0 || self.context.prompt_turns == 0 {
            anyhow::bail!("context.window_size and context.prompt_turns must be at least 1");
        }

        if self.supervisor.max_connect_attempts == 0 {
            anyhow::bail!("supervisor.max_connect_attempts must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> Settings {
        let mut settings = Settings::default();
        settings.llm.api_key = "sk-test".to_string();
        settings.chat.listen_list = vec!["Alice".to_string()];
        settings
    }

    #[test]
    fn test_defaults_match_relay_behaviour() {
        let settings = Settings::default();
        assert_eq!(settings.context.window_size, 5);
        assert_eq!(settings.chat.sentinel, "new messages follow");
        assert_eq!(settings.supervisor.max_connect_attempts, 3);
        assert_eq!(settings.supervisor.retry_delay_seconds, 5);
        assert_eq!(settings.supervisor.cool_down_seconds, 300);
        assert_eq!(settings.supervisor.recovery_pause_seconds, 10);
        assert_eq!(settings.supervisor.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.server.dashboard_url(), "http://127.0.0.1:5000");
    }

    #[test]
    fn test_validate() {
        assert!(valid_settings().validate().is_ok());

        let mut missing_key = valid_settings();
        missing_key.llm.api_key = "  ".to_string();
        assert!(missing_key.validate().is_err());

        let mut no_listeners = valid_settings();
        no_listeners.chat.listen_list.clear();
        assert!(no_listeners.validate().is_err());

        let mut empty_window = valid_settings();
        empty_window.context.window_size = 0;
        assert!(empty_window.validate().is_err());
    }

    #[test]
    fn test_system_prompt_personalized() {
        let prompts = PromptsConfig::default();
        assert_eq!(prompts.system_prompt_for("Alice"), "You are Alice's assistant.");
    }

    #[test]
    fn test_deserialize_partial_file() {
        let config = Config::builder()
            .add_source(File::from_str(
                r#"
                [llm]
                base_url = "http://localhost:8080/v1"
                api_key = "sk-local"
                model = "qwen"
                timeout_seconds = 10
                max_tokens = 256
                temperature = 0.2
                top_p = 0.9
                presence_penalty = 0.0

                [chat]
                bridge_url = "http://localhost:5100"
                listen_list = ["Alice", "Bob"]
                request_timeout_seconds = 5
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let settings: Settings = config.try_deserialize().unwrap();
        assert_eq!(settings.llm.model, "qwen");
        assert_eq!(settings.chat.listen_list, vec!["Alice", "Bob"]);
        assert_eq!(settings.chat.sentinel, "new messages follow");
        assert_eq!(settings.context.window_size, 5);
        assert_eq!(settings.server.port, 5000);
        assert!(settings.validate().is_ok());
    }

    fn env_vars(vars: &[(&str, &str)]) -> config::Map<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_environment_overrides_with_app_prefix() {
        let vars = env_vars(&[
            ("APP_LLM__API_KEY", "sk-from-env"),
            ("APP_CHAT__LISTEN_LIST", "Alice,Bob"),
            ("APP_SUPERVISOR__COOL_DOWN_SECONDS", "60"),
        ]);

        let settings =
            Settings::from_environment(Settings::environment().source(Some(vars))).unwrap();

        assert_eq!(settings.llm.api_key, "sk-from-env");
        assert_eq!(settings.chat.listen_list, vec!["Alice", "Bob"]);
        assert_eq!(settings.supervisor.cool_down_seconds, 60);
        // Untouched sections keep their defaults
        assert_eq!(settings.llm.model, "deepseek-v3");
        assert_eq!(settings.chat.sentinel, "new messages follow");
    }

    #[test]
    fn test_single_listener_from_environment() {
        let vars = env_vars(&[
            ("APP_LLM__API_KEY", "sk-from-env"),
            ("APP_CHAT__LISTEN_LIST", "Alice"),
        ]);

        let settings =
            Settings::from_environment(Settings::environment().source(Some(vars))).unwrap();
        assert_eq!(settings.chat.listen_list, vec!["Alice"]);
    }

    #[test]
    fn test_missing_api_key_fails_load() {
        let vars = env_vars(&[("APP_CHAT__LISTEN_LIST", "Alice")]);

        let err = Settings::from_environment(Settings::environment().source(Some(vars)))
            .unwrap_err();
        assert!(err.to_string().contains("APP_LLM__API_KEY"));
    }
}
