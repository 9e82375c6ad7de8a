//! Client authentication for the backup tool and the SQL client.
//!
//! An explicit password is written once to a private temporary option file
//! and referenced with `--defaults-extra-file`, which both xtrabackup and the
//! MySQL client tools require to be the first argument.

use crate::config::ConnectionConfig;
use crate::utils::errors::{OrchestratorError, Result};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Connection arguments shared by every tool that talks to the server.
#[derive(Debug)]
pub struct ClientAuth {
    option_file: Option<PathBuf>,
    user: Option<String>,
    host: String,
    port: u16,
    socket: Option<PathBuf>,
    // Keeps the generated option file alive; removed on drop
    _temp_file: Option<NamedTempFile>,
}

impl ClientAuth {
    pub fn from_config(conn: &ConnectionConfig) -> Result<Self> {
        if conn.password.is_some() && conn.credentials_file.is_some() {
            return Err(OrchestratorError::ConfigInvalid(
                "password and credentials_file are mutually exclusive".into(),
            ));
        }

        let mut auth = Self {
            option_file: conn.credentials_file.clone(),
            user: conn.user.clone(),
            host: conn.host.clone(),
            port: conn.port,
            socket: conn.socket.clone(),
            _temp_file: None,
        };

        if let Some(password) = &conn.password {
            // NamedTempFile is created with mode 0600
            let mut file = tempfile::Builder::new()
                .prefix(".mysql-backup-agent-")
                .suffix(".cnf")
                .tempfile()?;
            writeln!(file, "[client]")?;
            if let Some(user) = &conn.user {
                writeln!(file, "user={}", quote_option(user))?;
            }
            writeln!(file, "password={}", quote_option(password))?;
            file.flush()?;

            auth.option_file = Some(file.path().to_path_buf());
            auth.user = None;
            auth._temp_file = Some(file);
        }

        Ok(auth)
    }

    /// Arguments to place first on the command line of a client tool.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(file) = &self.option_file {
            args.push(format!("--defaults-extra-file={}", file.display()));
        }
        if let Some(user) = &self.user {
            args.push(format!("--user={}", user));
        }
        match &self.socket {
            Some(socket) => args.push(format!("--socket={}", socket.display())),
            None => {
                args.push(format!("--host={}", self.host));
                args.push(format!("--port={}", self.port));
            }
        }
        args
    }
}

/// Quote a value for a MySQL option file.
fn quote_option(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
