use serde::Deserialize;

use mineduel_core::engine::GameSettings;

/// Top-level server configuration, loaded from `mineduel.toml` with
/// environment overrides applied on top.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub web_root: String,
    pub data_dir: String,
    pub game: GameDefaults,
    pub rooms: RoomsConfig,
    pub limits: LimitsConfig,
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            web_root: "web".to_string(),
            data_dir: "data".to_string(),
            game: GameDefaults::default(),
            rooms: RoomsConfig::default(),
            limits: LimitsConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Default game settings for new rooms; creators may override per room.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameDefaults {
    pub grid_size: usize,
    pub mines_count: usize,
    pub turn_time_limit_secs: u32,
    pub min_reveals_to_pass: u32,
}

impl Default for GameDefaults {
    fn default() -> Self {
        Self {
            grid_size: 10,
            mines_count: 18,
            turn_time_limit_secs: 30,
            min_reveals_to_pass: 1,
        }
    }
}

impl GameDefaults {
    pub fn settings(&self) -> GameSettings {
        GameSettings {
            grid_size: self.grid_size,
            mines_count: self.mines_count,
            turn_time_limit: self.turn_time_limit_secs,
            min_reveals_to_pass: self.min_reveals_to_pass,
        }
        .sanitized()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub code_length: usize,
    /// Rooms not in play older than this are swept.
    pub idle_timeout_ms: u64,
    pub idle_check_interval_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            idle_timeout_ms: 30 * 60 * 1000,
            idle_check_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Outbound messages buffered per connection before drops.
    pub client_message_buffer: usize,
    pub chat_cooldown_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 1024,
            client_message_buffer: 64,
            chat_cooldown_ms: 2000,
        }
    }
}

/// Admin credential + token signing secret.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub username: String,
    /// None disables the admin surface entirely.
    pub password: Option<String>,
    pub token_secret: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: None,
            token_secret: "change-me".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate configuration, logging warnings for issues.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }

        if !(4..=10).contains(&self.rooms.code_length) {
            tracing::error!(
                code_length = self.rooms.code_length,
                "rooms.code_length must be between 4 and 10"
            );
            std::process::exit(1);
        }

        if self.admin.password.is_some() && self.admin.token_secret == "change-me" {
            tracing::warn!(
                "admin password set with the default token secret — set MINEDUEL_TOKEN_SECRET in production"
            );
        }
        if self.admin.password.is_none() {
            tracing::info!("no admin password configured, admin surface disabled");
        }
    }

    /// Load config from `mineduel.toml` if it exists, then apply env var
    /// overrides. Game tuning keys use the documented bare names
    /// (`TURN_TIME_LIMIT`, `GRID_SIZE`, ...); paths and secrets use the
    /// `MINEDUEL_` prefix.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("mineduel.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from mineduel.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse mineduel.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No mineduel.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Some(port) = env_parse::<u16>("PORT") {
            let host = config
                .listen_addr
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            config.listen_addr = format!("{host}:{port}");
        }
        if let Ok(addr) = std::env::var("MINEDUEL_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(root) = std::env::var("MINEDUEL_WEB_ROOT")
            && !root.is_empty()
        {
            config.web_root = root;
        }
        if let Ok(dir) = std::env::var("MINEDUEL_DATA_DIR")
            && !dir.is_empty()
        {
            config.data_dir = dir;
        }

        if let Some(v) = env_parse("GRID_SIZE") {
            config.game.grid_size = v;
        }
        if let Some(v) = env_parse("DEFAULT_MINES_COUNT") {
            config.game.mines_count = v;
        }
        if let Some(v) = env_parse("TURN_TIME_LIMIT") {
            config.game.turn_time_limit_secs = v;
        }
        if let Some(v) = env_parse("MIN_REVEALS_TO_PASS") {
            config.game.min_reveals_to_pass = v;
        }
        if let Some(v) = env_parse("ROOM_CODE_LENGTH") {
            config.rooms.code_length = v;
        }
        if let Some(v) = env_parse("ROOM_IDLE_TIMEOUT") {
            config.rooms.idle_timeout_ms = v;
        }

        if let Ok(user) = std::env::var("MINEDUEL_ADMIN_USERNAME")
            && !user.is_empty()
        {
            config.admin.username = user;
        }
        if let Ok(pass) = std::env::var("MINEDUEL_ADMIN_PASSWORD")
            && !pass.is_empty()
        {
            config.admin.password = Some(pass);
        }
        if let Ok(secret) = std::env::var("MINEDUEL_TOKEN_SECRET")
            && !secret.is_empty()
        {
            config.admin.token_secret = secret;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
        assert_eq!(cfg.game.grid_size, 10);
        assert_eq!(cfg.game.mines_count, 18);
        assert_eq!(cfg.game.turn_time_limit_secs, 30);
        assert_eq!(cfg.rooms.code_length, 6);
        assert_eq!(cfg.rooms.idle_timeout_ms, 1_800_000);
        assert_eq!(cfg.limits.chat_cooldown_ms, 2000);
        assert!(cfg.admin.password.is_none());
    }

    #[test]
    fn parse_minimal_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"

[game]
grid_size = 12
mines_count = 24

[admin]
password = "hunter2"
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.game.grid_size, 12);
        assert_eq!(cfg.game.mines_count, 24);
        assert_eq!(cfg.admin.password.as_deref(), Some("hunter2"));
        // Untouched sections keep their defaults
        assert_eq!(cfg.rooms.code_length, 6);
    }

    #[test]
    fn game_defaults_produce_sane_settings() {
        let settings = GameDefaults {
            grid_size: 100,
            mines_count: 100_000,
            turn_time_limit_secs: 0,
            min_reveals_to_pass: 0,
        }
        .settings();
        assert!(settings.grid_size <= 32);
        assert!(settings.mines_count < settings.grid_size * settings.grid_size);
        assert!(settings.turn_time_limit >= 1);
        assert!(settings.min_reveals_to_pass >= 1);
    }

    #[test]
    fn invalid_addr_detected() {
        let cfg = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        // validate() exits the process, so test the underlying check
        assert!(cfg.listen_addr.parse::<std::net::SocketAddr>().is_err());
    }
}
