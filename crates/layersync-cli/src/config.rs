//! Database connection settings.
//!
//! Flags fall back to the usual libpq environment variables, which may
//! themselves come from a `.env` file loaded before parsing.

use clap::Args;
use dialoguer::Password;
use layersync::{Error, Result};

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Database server host
    #[arg(long, env = "PGHOST", default_value = "localhost", global = true)]
    pub host: String,

    /// Database server port
    #[arg(long, env = "PGPORT", default_value_t = 5432, global = true)]
    pub port: u16,

    /// Database name
    #[arg(long, env = "PGDATABASE", global = true)]
    pub database: Option<String>,

    /// Database user
    #[arg(long, env = "PGUSER", global = true)]
    pub user: Option<String>,

    /// Database password; prompts without echo when given without a value
    #[arg(
        long,
        env = "PGPASSWORD",
        num_args = 0..=1,
        default_missing_value = "",
        hide_env_values = true,
        global = true
    )]
    pub password: Option<String>,
}

impl DatabaseArgs {
    /// Build the driver configuration, prompting for a password if asked to.
    pub fn pg_config(&self) -> Result<tokio_postgres::Config> {
        self.pg_config_with(prompt_password)
    }

    fn pg_config_with(
        &self,
        prompt: impl FnOnce(&str) -> Result<String>,
    ) -> Result<tokio_postgres::Config> {
        let database = self
            .database
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or(Error::MissingParameter("database"))?;
        let user = self
            .user
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(Error::MissingParameter("user"))?;

        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(database)
            .user(user)
            .application_name("layersync");

        match self.password.as_deref() {
            Some("") => {
                let password = prompt(user)?;
                config.password(password);
            }
            Some(password) => {
                config.password(password);
            }
            None => {}
        }
        Ok(config)
    }

    /// `user@host:port/database`, for log lines.
    pub fn describe(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user.as_deref().unwrap_or("?"),
            self.host,
            self.port,
            self.database.as_deref().unwrap_or("?")
        )
    }
}

fn prompt_password(user: &str) -> Result<String> {
    Password::new()
        .with_prompt(format!("Password for {user}"))
        .allow_empty_password(true)
        .interact()
        .map_err(|e| Error::Io(std::io::Error::other(e)))
}
